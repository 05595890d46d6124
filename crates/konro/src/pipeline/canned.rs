//! Loopback streaming pipeline.
//!
//! Serves a canned reply script instead of running a model, exercising the
//! full session-cache contract end to end. Useful for wiring up transports
//! and as the reference consumer of the cache.

use async_trait::async_trait;
use tracing::debug;

use super::core_trait::{Pipeline, PipelineError, Stage};
use crate::config::ServeConfig;
use crate::context::BatchContext;
use crate::session::{StoppingCriteria, StreamingSession};

fn default_script() -> Vec<String> {
    ["hello world ", "hello ", "hello ", "hello "]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Pipeline that streams scripted replies per request.
///
/// On first sight of a request id, the session is seeded with the script
/// plus the echoed payload. Replies are served most-recently-queued first,
/// so the echoed payload streams first and the script's head streams last.
/// With the default script and config, the stream is `payload`, `hello `
/// three times, then `hello world `, whose stop-token match ends the stream
/// on the fifth step.
pub struct CannedReplyPipeline {
    script: Vec<String>,
    max_seq_length: usize,
    stop_token: String,
}

impl CannedReplyPipeline {
    /// Creates a pipeline whose sessions use `config`'s stopping criteria
    /// and the default reply script.
    pub fn new(config: &ServeConfig) -> Self {
        Self {
            script: default_script(),
            max_seq_length: config.max_seq_length(),
            stop_token: config.stop_token().to_string(),
        }
    }

    /// Replaces the reply script. The last element streams first.
    pub fn with_script(mut self, script: Vec<String>) -> Self {
        self.script = script;
        self
    }
}

#[async_trait]
impl Pipeline for CannedReplyPipeline {
    type Raw = String;
    type Prepared = String;
    type Output = String;
    type Response = String;

    async fn preprocess(
        &self,
        ctx: &BatchContext,
        raw: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        if ctx.request_ids().len() != raw.len() {
            return Err(PipelineError::stage(
                Stage::Preprocess,
                format!(
                    "context supplies {} ids for {} payloads",
                    ctx.request_ids().len(),
                    raw.len()
                ),
            ));
        }
        debug!(requests = raw.len(), "preprocessing canned batch");
        for (id, payload) in ctx.request_ids().iter().zip(&raw) {
            ctx.cache()
                .ensure(id, || {
                    let mut replies = self.script.clone();
                    replies.push(payload.clone());
                    StreamingSession::new(StoppingCriteria::new(
                        self.max_seq_length,
                        self.stop_token.clone(),
                    ))
                    .with_pending_replies(replies)
                })
                .await;
        }
        Ok(raw)
    }

    async fn infer(
        &self,
        ctx: &BatchContext,
        prepared: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        let mut replies = Vec::with_capacity(prepared.len());
        for id in ctx.request_ids() {
            replies.push(ctx.cache().pop_next_reply(id).await?);
        }
        Ok(replies)
    }

    async fn postprocess(
        &self,
        ctx: &BatchContext,
        outputs: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        for (id, reply) in ctx.request_ids().iter().zip(&outputs) {
            let decision = ctx.cache().record_step(id, reply).await?;
            ctx.push_decision(decision).await;
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;
    use crate::session::{Decision, SessionCache};

    async fn run_step(
        pipeline: &CannedReplyPipeline,
        cache: &SessionCache,
        id: &RequestId,
        payload: &str,
    ) -> (String, Decision) {
        let ctx = BatchContext::new(cache.clone(), vec![id.clone()]);
        let prepared = pipeline
            .preprocess(&ctx, vec![payload.to_string()])
            .await
            .unwrap();
        let outputs = pipeline.infer(&ctx, prepared).await.unwrap();
        let mut responses = pipeline.postprocess(&ctx, outputs).await.unwrap();
        (responses.remove(0), ctx.decisions().await[0])
    }

    #[tokio::test]
    async fn streams_script_and_stops_on_token() {
        let config = ServeConfig::default();
        let pipeline = CannedReplyPipeline::new(&config);
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");

        let mut stream = Vec::new();
        for step in 0..5 {
            let (reply, decision) = run_step(&pipeline, &cache, &id, "ping").await;
            let expected = if step < 4 {
                Decision::Continue
            } else {
                Decision::Stop
            };
            assert_eq!(decision, expected, "step {step}");
            stream.push(reply);
        }

        assert_eq!(
            stream,
            vec!["ping", "hello ", "hello ", "hello ", "hello world "]
        );
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn reuses_the_session_across_calls() {
        let config = ServeConfig::default();
        let pipeline = CannedReplyPipeline::new(&config);
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");

        let (first, _) = run_step(&pipeline, &cache, &id, "ping").await;
        assert_eq!(first, "ping");
        // Second call must reuse the seeded buffer, not re-seed with the new
        // payload.
        let (second, _) = run_step(&pipeline, &cache, &id, "other").await;
        assert_eq!(second, "hello ");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn custom_script_stops_by_length() {
        let config = ServeConfig::default()
            .with_max_seq_length(2)
            .with_stop_token("never");
        let pipeline =
            CannedReplyPipeline::new(&config).with_script(vec!["one".into(), "two".into()]);
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");

        let (reply, decision) = run_step(&pipeline, &cache, &id, "ping").await;
        assert_eq!((reply.as_str(), decision), ("ping", Decision::Continue));
        let (reply, decision) = run_step(&pipeline, &cache, &id, "ping").await;
        assert_eq!((reply.as_str(), decision), ("two", Decision::Stop));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn mismatched_context_fails_preprocess() {
        let config = ServeConfig::default();
        let pipeline = CannedReplyPipeline::new(&config);
        let cache = SessionCache::new();
        let ctx = BatchContext::new(cache, vec![RequestId::new("a"), RequestId::new("b")]);

        let result = pipeline.preprocess(&ctx, vec!["only one".to_string()]).await;
        assert!(matches!(
            result,
            Err(PipelineError::Stage {
                stage: Stage::Preprocess,
                ..
            })
        ));
    }
}
