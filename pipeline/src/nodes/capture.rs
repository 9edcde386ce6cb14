use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{NodeName, RunState, StepResult};
use crate::io::automation::CaptureRequest;

use super::{Node, RunContext};

/// Captures the target page for the feasibility check.
pub struct CaptureState;

impl Node for CaptureState {
    fn name(&self) -> NodeName {
        NodeName::CaptureState
    }

    fn action(&self) -> &'static str {
        "capture"
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id, url = %state.target))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let settings = &ctx.config.capture;
        let request = CaptureRequest {
            run_id: ctx.run_id,
            target: &state.target,
            full_page: settings.full_page,
            scroll_cycles: settings.scroll_cycles,
            scroll_wait: Duration::from_millis(settings.scroll_wait_ms),
        };

        let (ok, reference, message) = match ctx.collaborators.automation.capture(&request) {
            Ok(capture) if capture.ok && !capture.reference.trim().is_empty() => {
                info!(reference = %capture.reference, "page captured");
                (true, Some(capture.reference), "Page state captured".to_string())
            }
            Ok(_) => {
                warn!("capture reported failure");
                (false, None, "Capture reported failure".to_string())
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "capture failed");
                (false, None, format!("Capture failed: {err:#}"))
            }
        };

        state.capture_ok = Some(ok);
        state.capture_ref = reference;
        state.capture_message = Some(message.clone());
        Ok(StepResult::new(ok, message))
    }
}
