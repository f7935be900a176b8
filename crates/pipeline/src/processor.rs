//! Serial executor for pipeline actions

use crate::{Action, ActionContext, CancelToken};
use otad_errors::ErrorCode;
use otad_events::{Event, EventSender, EventSenderExt};
use otad_types::InstallPlan;

/// Runs an ordered list of actions serially, piping each successful
/// action's output plan into the next action's input slot.
///
/// The first non-success completion aborts the pipeline and becomes its
/// final code. Exactly one `ActionCompleted` event is emitted per action
/// performed.
pub struct ActionProcessor {
    actions: Vec<Box<dyn Action>>,
    events: EventSender,
    cancel: CancelToken,
}

impl ActionProcessor {
    /// Create an empty processor.
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self {
            actions: Vec::new(),
            events,
            cancel: CancelToken::new(),
        }
    }

    /// Append an action to the pipeline.
    pub fn enqueue_action(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    /// Handle for stopping the pipeline from outside `run`.
    #[must_use]
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Run the pipeline to completion, seeding the first action with `plan`.
    ///
    /// Returns the final completion code: `Success` when every action
    /// succeeded, the first failing action's code otherwise, and `Error`
    /// when the pipeline was stopped.
    pub async fn run(mut self, plan: InstallPlan) -> ErrorCode {
        let mut ctx = ActionContext::new(self.events.clone(), self.cancel.clone());
        ctx.set_input(plan);

        let mut code = ErrorCode::Success;
        for action in &mut self.actions {
            // A stop between actions surfaces as a failed pipeline without
            // starting the next stage.
            if self.cancel.is_cancelled() {
                code = ErrorCode::Error;
                break;
            }

            self.events.emit(Event::ActionStarted {
                action: action.name().to_string(),
            });
            code = action.perform(&mut ctx).await;
            self.events.emit(Event::ActionCompleted {
                action: action.name().to_string(),
                code,
            });

            if !code.is_success() {
                break;
            }

            // Pipe: the output slot, if the action filled one, feeds the
            // next stage's input.
            if let Some(output) = ctx.take_output() {
                ctx.set_input(output);
            }
        }
        code
    }
}

/// Clonable handle that can stop a running [`ActionProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorHandle {
    cancel: CancelToken,
}

impl ProcessorHandle {
    /// Request the pipeline to stop.
    ///
    /// Only the currently-running action observes the request mid-flight;
    /// later actions never start. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
