//! Review stage: asks the Manager for a one-token verdict.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::io::generator::{GenerateRequest, TextGenerator};
use crate::io::prompt::{PromptBuilder, ReviewPromptInputs};

use super::{StageCall, StageExchange};

#[derive(Debug, Clone)]
pub struct ReviewStage {
    prompts: PromptBuilder,
}

impl ReviewStage {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// Request a verdict on `worker_output`. The reply is returned untrimmed.
    #[instrument(skip_all, fields(run_id = call.run_id, iteration = call.iteration))]
    pub fn run<G: TextGenerator>(
        &self,
        generator: &G,
        worker_output: &str,
        original_prompt: &str,
        call: StageCall<'_>,
    ) -> Result<StageExchange> {
        let pack = self.prompts.build_review(&ReviewPromptInputs {
            original_prompt,
            worker_output,
        })?;
        debug!(sections = ?pack.section_keys(), "review sections kept");
        let instruction = pack.into_string();
        debug!(bytes = instruction.len(), "review instruction built");

        let request = GenerateRequest {
            run_id: call.run_id.to_string(),
            iteration: call.iteration,
            instruction,
            cancel: call.cancel.clone(),
        };
        let response = generator.generate(&request)?;
        debug!(verdict = response.trim(), "manager replied");
        Ok(StageExchange {
            instruction: request.instruction,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::generator::GenerationError;
    use std::cell::RefCell;
    use tokio_util::sync::CancellationToken;

    struct CapturingGenerator {
        reply: String,
        last_instruction: RefCell<Option<String>>,
    }

    impl TextGenerator for CapturingGenerator {
        fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
            *self.last_instruction.borrow_mut() = Some(request.instruction.clone());
            Ok(self.reply.clone())
        }
    }

    struct DownGenerator;

    impl TextGenerator for DownGenerator {
        fn generate(&self, _request: &GenerateRequest) -> Result<String, GenerationError> {
            Err(GenerationError::Unavailable {
                message: "connection refused".to_string(),
            })
        }
    }

    #[test]
    fn reply_is_returned_unmodified() {
        let cancel = CancellationToken::new();
        let generator = CapturingGenerator {
            reply: "\n  Completed  \n".to_string(),
            last_instruction: RefCell::new(None),
        };

        let exchange = ReviewStage::new(10_000)
            .run(
                &generator,
                "saved portal.png",
                "Capture the portal",
                StageCall {
                    run_id: "run-1",
                    iteration: 0,
                    cancel: &cancel,
                },
            )
            .expect("review");

        assert_eq!(exchange.response, "\n  Completed  \n");
        let instruction = generator.last_instruction.borrow().clone().expect("sent");
        assert!(instruction.contains("saved portal.png"));
        assert!(instruction.contains("Capture the portal"));
        assert!(instruction.contains("- COMPLETED"));
    }

    #[test]
    fn generator_fault_propagates_typed() {
        let cancel = CancellationToken::new();
        let err = ReviewStage::new(10_000)
            .run(
                &DownGenerator,
                "out",
                "prompt",
                StageCall {
                    run_id: "run-1",
                    iteration: 0,
                    cancel: &cancel,
                },
            )
            .unwrap_err();
        assert!(err.downcast_ref::<GenerationError>().is_some());
        assert!(format!("{err:#}").contains("connection refused"));
    }
}
