//! The pipeline action capability and its execution context

use crate::CancelToken;
use async_trait::async_trait;
use otad_errors::ErrorCode;
use otad_events::EventSender;
use otad_types::InstallPlan;

/// Everything an action needs while performing: the typed input/output
/// slots, the event channel, and the cancellation token.
///
/// The output slot of action *N* becomes the input slot of action *N+1*;
/// the processor does the piping between stages.
#[derive(Debug)]
pub struct ActionContext {
    input: Option<InstallPlan>,
    output: Option<InstallPlan>,
    events: EventSender,
    cancel: CancelToken,
}

impl ActionContext {
    /// Create a context with empty slots.
    #[must_use]
    pub fn new(events: EventSender, cancel: CancelToken) -> Self {
        Self {
            input: None,
            output: None,
            events,
            cancel,
        }
    }

    /// Whether a predecessor (or the pipeline owner) wired an input plan.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Take ownership of the input plan.
    pub fn take_input(&mut self) -> Option<InstallPlan> {
        self.input.take()
    }

    /// Fill the input slot for the next `perform`.
    pub fn set_input(&mut self, plan: InstallPlan) {
        self.input = Some(plan);
    }

    /// Publish the plan for the next stage. Only meaningful on success;
    /// the processor ignores the output slot of a failed action.
    pub fn set_output(&mut self, plan: InstallPlan) {
        self.output = Some(plan);
    }

    /// Take the published output, if any.
    pub fn take_output(&mut self) -> Option<InstallPlan> {
        self.output.take()
    }

    /// The pipeline's event channel.
    #[must_use]
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Token signalled when the pipeline owner stops processing.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// One node of the update pipeline.
///
/// `perform` returns exactly once per invocation; its return value is the
/// action's completion code. Cancellation is delivered through the
/// context's [`CancelToken`] and must still result in a single return,
/// after the action has released its resources.
#[async_trait]
pub trait Action: Send {
    /// Stable name used in lifecycle events.
    fn name(&self) -> &'static str;

    /// Do the action's work.
    async fn perform(&mut self, ctx: &mut ActionContext) -> ErrorCode;
}
