//! Stateful "previous response" API through the gateway.
//!
//! The first call sends the whole history. Every later call sends only the
//! last message plus the id of the previous response, and the provider
//! rebuilds the earlier context server-side.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::conversation::ConversationState;
use crate::cost::{CostAccountant, CostRules};
use crate::error::Error;
use crate::message::{apply_cache_control, to_wire, Message};
use crate::stats::ModelStats;
use crate::text::extract_response_text;
use crate::Result;

use super::gateway::GatewayConnection;
use super::{
    decode, send_json, BackendContext, BackendCore, ModelBackend, QueryResult, ResponsesReply,
};

/// A successful responses call always has a measurable cost.
const RESPONSES_COST_RULES: CostRules = CostRules {
    fix_totals: false,
    require_positive: true,
};

/// Responses-API backend with server-side conversation continuation.
pub struct GatewayResponsesBackend {
    pub(crate) core: BackendCore,
    connection: GatewayConnection,
    costs: CostAccountant,
    conversation: ConversationState,
}

impl GatewayResponsesBackend {
    pub fn new(config: ModelConfig, ctx: &BackendContext) -> Result<Self> {
        let connection = GatewayConnection::from_config(&config)?;
        let costs = CostAccountant::for_config(ctx.pricing.clone(), &config)?;
        Ok(Self {
            core: BackendCore::new(config, ctx),
            connection,
            costs,
            conversation: ConversationState::default(),
        })
    }
}

#[async_trait]
impl ModelBackend for GatewayResponsesBackend {
    async fn query_with_params(
        &mut self,
        messages: &[Message],
        params: &Map<String, Value>,
    ) -> Result<QueryResult> {
        if messages.is_empty() {
            return Err(Error::InvalidArgument(
                "responses backend needs at least one message".to_string(),
            ));
        }

        let messages = match self.core.config.cache_control {
            Some(mode) => apply_cache_control(messages, mode),
            None => messages.to_vec(),
        };

        let previous = self.conversation.continuation();
        let input = match previous {
            None => &messages[..],
            Some(_) => &messages[messages.len() - 1..],
        };
        debug!(
            "Sending {} of {} message(s), previous_response_id: {:?}",
            input.len(),
            messages.len(),
            previous
        );

        let body = self.core.body(
            vec![
                ("model", json!(self.core.config.model_name)),
                ("input", Value::Array(to_wire(input))),
                ("previous_response_id", json!(previous)),
            ],
            params,
        )?;

        let url = self.connection.url("responses");
        let core = &self.core;
        let connection = &self.connection;
        let body = &body;
        let url = url.as_str();
        let provider = core.provider();

        // Only the transport is retried. A delivered reply is never re-sent.
        let raw = core
            .policy
            .execute(&core.cancel, move || async move {
                let request = connection.authorize(core.post(url)).json(body);
                send_json(request, provider).await
            })
            .await?;
        let reply: ResponsesReply = decode(&raw, provider)?;

        // The provider has stored this turn even if pricing fails below.
        if !self.conversation.advance(reply.id.as_deref()) {
            warn!(
                "Response for model {} has no id; keeping previous continuation {:?}",
                self.core.config.model_name,
                self.conversation.continuation()
            );
        }

        let text = extract_response_text(&raw);
        let cost = self.costs.token_cost(
            &self.core.config,
            reply.model.as_deref(),
            reply.usage.as_ref(),
            RESPONSES_COST_RULES,
        )?;
        self.core.record(cost);

        Ok(QueryResult {
            content: text,
            response: raw,
            cost,
        })
    }

    fn config(&self) -> &ModelConfig {
        &self.core.config
    }

    fn stats(&self) -> ModelStats {
        self.core.stats
    }

    fn conversation(&self) -> Option<&ConversationState> {
        Some(&self.conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CostTrackingMode, ProviderKind};
    use crate::cost::testing::FixedPricing;
    use crate::models::testing::{config, context};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(id: Option<&str>, text: &str) -> ResponseTemplate {
        let mut body = json!({
            "object": "response",
            "model": "gpt-5-mini",
            "output": [
                {"type": "reasoning", "summary": []},
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": text}]
                }
            ],
            "usage": {"input_tokens": 20, "output_tokens": 7, "total_tokens": 27}
        });
        if let Some(id) = id {
            body["id"] = json!(id);
        }
        ResponseTemplate::new(200).set_body_json(body)
    }

    async fn backend(server: &MockServer, cost: f64) -> GatewayResponsesBackend {
        let (ctx, _) = context(cost);
        GatewayResponsesBackend::new(
            config(ProviderKind::GatewayResponses, "gpt-5-mini", &server.uri()).with_api_key("pk"),
            &ctx,
        )
        .unwrap()
    }

    async fn sent_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.body_json().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_continuation_sends_only_last_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(reply(Some("r1"), "first answer"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(reply(Some("r2"), "second answer"))
            .mount(&server)
            .await;

        let mut backend = backend(&server, 0.01).await;

        let first = backend.query(&[Message::user("one")]).await.unwrap();
        assert_eq!(first.content, "first answer");
        assert_eq!(backend.conversation().unwrap().continuation(), Some("r1"));

        let history = vec![
            Message::user("one"),
            Message::assistant("first answer"),
            Message::user("three"),
        ];
        let second = backend.query(&history).await.unwrap();
        assert_eq!(second.content, "second answer");
        assert_eq!(backend.conversation().unwrap().continuation(), Some("r2"));

        let bodies = sent_bodies(&server).await;
        assert_eq!(bodies[0]["previous_response_id"], Value::Null);
        assert_eq!(bodies[0]["input"], json!([{"role": "user", "content": "one"}]));
        assert_eq!(bodies[1]["previous_response_id"], "r1");
        assert_eq!(bodies[1]["input"], json!([{"role": "user", "content": "three"}]));
        assert_eq!(backend.stats().n_calls, 2);
    }

    #[tokio::test]
    async fn test_missing_id_keeps_previous_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(Some("r1"), "a"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(reply(None, "b"))
            .mount(&server)
            .await;

        let mut backend = backend(&server, 0.01).await;
        backend.query(&[Message::user("x")]).await.unwrap();
        backend
            .query(&[Message::user("x"), Message::user("y")])
            .await
            .unwrap();
        assert_eq!(backend.conversation().unwrap().continuation(), Some("r1"));
    }

    #[tokio::test]
    async fn test_zero_cost_is_an_error_unless_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(Some("r1"), "a"))
            .mount(&server)
            .await;

        let mut strict = backend(&server, 0.0).await;
        let err = strict.query(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, Error::CostTracking { .. }));
        // the turn was stored server-side, so the conversation still moves on
        assert_eq!(strict.conversation().unwrap().continuation(), Some("r1"));
        assert_eq!(strict.stats().n_calls, 0);

        let (ctx, _) = context(0.0);
        let mut lenient = GatewayResponsesBackend::new(
            config(ProviderKind::GatewayResponses, "gpt-5-mini", &server.uri())
                .with_api_key("pk")
                .with_cost_tracking(CostTrackingMode::IgnoreErrors),
            &ctx,
        )
        .unwrap();
        let result = lenient.query(&[Message::user("x")]).await.unwrap();
        assert_eq!(result.cost, 0.0);
    }

    #[tokio::test]
    async fn test_usage_uses_responses_field_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(Some("r1"), "a"))
            .mount(&server)
            .await;

        let oracle = FixedPricing::cost(0.02);
        let (ctx, _) = context(0.0);
        let mut backend = GatewayResponsesBackend::new(
            config(ProviderKind::GatewayResponses, "gpt-5-mini", &server.uri()).with_api_key("pk"),
            &ctx.with_pricing(oracle.clone()),
        )
        .unwrap();
        backend.query(&[Message::user("x")]).await.unwrap();

        let calls = oracle.calls.lock().unwrap();
        assert_eq!(calls[0].1.prompt_tokens, 20);
        assert_eq!(calls[0].1.completion_tokens, 7);
    }

    #[tokio::test]
    async fn test_malformed_usage_is_not_resent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r1",
                "model": "gpt-5-mini",
                "output_text": "answer",
                "usage": {"prompt_tokens": 20, "input_tokens": 20, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let (ctx, global) = context(0.0);
        let mut lenient = GatewayResponsesBackend::new(
            config(ProviderKind::GatewayResponses, "gpt-5-mini", &server.uri())
                .with_api_key("pk")
                .with_cost_tracking(CostTrackingMode::IgnoreErrors),
            &ctx,
        )
        .unwrap();
        let result = lenient.query(&[Message::user("x")]).await.unwrap();
        assert_eq!(result.content, "answer");
        assert_eq!(result.cost, 0.0);
        assert_eq!(lenient.conversation().unwrap().continuation(), Some("r1"));
        assert_eq!(global.n_calls(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        let mut strict = backend(&server, 0.0).await;
        let err = strict.query(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, Error::CostTracking { .. }));
        assert_eq!(strict.conversation().unwrap().continuation(), Some("r1"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_history_is_rejected() {
        let server = MockServer::start().await;
        let mut backend = backend(&server, 0.01).await;
        let err = backend.query(&[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
