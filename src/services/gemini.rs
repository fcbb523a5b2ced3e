use anyhow::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{AnalysisResult, Role, Source};
use crate::services::ai_service::{
    AIService, AnalysisError, ChatChunk, ChatError, ChatTurnRequest, FragmentStream, ImagePayload,
};
use crate::services::schema::analysis_schema;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const ANALYSIS_PROMPT: &str = "Analyze this meal photo. Provide a detailed nutritional breakdown, \
    including calories, macros (protein, carbs, fat), key micronutrients, a NOVA score, \
    a general health score out of 100, and some brief health tips. \
    Respond in the requested JSON format.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "googleSearch")]
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    /// Web citations from the first candidate's grounding metadata, `None` if there are none.
    fn web_sources(&self) -> Option<Vec<Source>> {
        let chunks = &self
            .candidates
            .first()?
            .grounding_metadata
            .as_ref()?
            .grounding_chunks;

        let sources: Vec<Source> = chunks
            .iter()
            .filter_map(|c| c.web.as_ref())
            .filter_map(|web| {
                web.uri.as_ref().map(|uri| Source {
                    uri: uri.clone(),
                    title: web.title.clone().unwrap_or_default(),
                })
            })
            .collect();

        if sources.is_empty() {
            None
        } else {
            Some(sources)
        }
    }
}

/// Client for the Gemini REST API. Built once at startup and shared by every request.
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn request_analysis(&self, image: &ImagePayload) -> Result<AnalysisResult> {
        let request = build_analysis_request(image);

        log::info!("🤖 Sending analysis request to Gemini with model: {}", self.model);
        log::debug!("📤 Inline image: {} ({} base64 bytes)", image.mime_type, image.data.len());

        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        log::debug!("📥 Gemini response status: {}", response.status());

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let body: GenerateResponse = response.json().await?;
        let result = parse_analysis(&body.text())?;

        log::info!("✅ Analysis complete: {} ({} kcal)", result.meal_name, result.total_calories);
        Ok(result)
    }
}

#[async_trait::async_trait]
impl AIService for GeminiClient {
    async fn analyze_food_image(&self, image: &ImagePayload) -> Result<AnalysisResult, AnalysisError> {
        self.request_analysis(image).await.map_err(|e| {
            log::error!("❌ Error analyzing image: {:#}", e);
            AnalysisError::failed(e)
        })
    }

    async fn stream_chat(&self, request: ChatTurnRequest) -> Result<FragmentStream, ChatError> {
        let body = build_chat_request(&request);

        log::info!(
            "💬 Streaming chat reply from {} ({} prior turns)",
            self.model,
            request.history.len()
        );

        let response = self
            .client
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            log::error!("❌ Gemini chat error ({}): {}", status, message);
            return Err(ChatError::Api { status, message });
        }

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let mut bytes_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut sources = None;
            let mut events = 0usize;

            while let Some(bytes) = bytes_stream.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ChatError::Http(e))).await;
                        return;
                    }
                };

                for data in decoder.feed(&bytes) {
                    events += 1;
                    let chunk = parse_stream_event(&data, &mut sources);
                    let failed = chunk.is_err();
                    if tx.send(chunk).await.is_err() || failed {
                        return;
                    }
                }
            }

            if let Some(data) = decoder.finish() {
                events += 1;
                let _ = tx.send(parse_stream_event(&data, &mut sources)).await;
            }

            if events == 0 {
                let _ = tx.send(Err(ChatError::Interrupted)).await;
                return;
            }

            log::debug!("📄 Chat stream finished after {} events", events);
        });

        Ok(FragmentStream::new(rx, Some(task)))
    }
}

fn build_analysis_request(image: &ImagePayload) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.data.clone(),
                    },
                },
                Part::Text {
                    text: ANALYSIS_PROMPT.to_string(),
                },
            ],
        }],
        system_instruction: None,
        tools: vec![],
        generation_config: Some(GenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: analysis_schema(),
        }),
    }
}

fn build_chat_request(request: &ChatTurnRequest) -> GenerateRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| Content {
            role: Some(wire_role(turn.role).to_string()),
            parts: vec![Part::Text {
                text: turn.text.clone(),
            }],
        })
        .collect();
    contents.push(Content {
        role: Some("user".to_string()),
        parts: vec![Part::Text {
            text: request.message.clone(),
        }],
    });

    let tools = if request.search_grounding {
        vec![Tool {
            google_search: GoogleSearch {},
        }]
    } else {
        vec![]
    };

    GenerateRequest {
        contents,
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part::Text {
                text: request.system_instruction.clone(),
            }],
        }),
        tools,
        generation_config: None,
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn parse_analysis(text: &str) -> Result<AnalysisResult> {
    let json = text.trim();
    if json.is_empty() {
        anyhow::bail!("Gemini returned no text");
    }

    let result: AnalysisResult = serde_json::from_str(json)?;
    result.validate().map_err(anyhow::Error::msg)?;
    Ok(result)
}

/// Turn one SSE `data:` payload into a fragment. A payload with web citations
/// replaces `sources`; the current sources ride along on every later fragment.
fn parse_stream_event(data: &str, sources: &mut Option<Vec<Source>>) -> Result<ChatChunk, ChatError> {
    let response: GenerateResponse =
        serde_json::from_str(data).map_err(|e| ChatError::Parse(e.to_string()))?;

    if let Some(err) = response.error {
        return Err(ChatError::Api {
            status: err.code,
            message: err.message,
        });
    }

    if let Some(found) = response.web_sources() {
        *sources = Some(found);
    }

    Ok(ChatChunk {
        text: response.text(),
        sources: sources.clone(),
    })
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_line(&line) {
                events.push(data);
            }
        }
        events
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_line(&rest)
    }
}

fn data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai_service::Turn;

    #[test]
    fn test_analysis_request_shape() {
        let image = ImagePayload {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        let json = serde_json::to_value(build_analysis_request(&image)).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AAAA");
        assert!(parts[1]["text"].as_str().unwrap().starts_with("Analyze this meal photo"));
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert!(json.get("tools").is_none());
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatTurnRequest {
            system_instruction: "Be helpful".to_string(),
            search_grounding: true,
            history: vec![
                Turn { role: Role::User, text: "Hi".to_string() },
                Turn { role: Role::Assistant, text: "Hello!".to_string() },
            ],
            message: "Is oatmeal healthy?".to_string(),
        };
        let json = serde_json::to_value(build_chat_request(&request)).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "Is oatmeal healthy?");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be helpful");
        assert_eq!(json["tools"][0]["googleSearch"], serde_json::json!({}));
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn test_parse_analysis() {
        let text = r#"
            {"mealName":"Pizza Margherita","description":"Two slices","totalCalories":650,
             "macros":{"protein":25.5,"carbohydrates":80,"fat":22},
             "micronutrients":[{"name":"Calcium","amount":300,"unit":"mg"}],
             "novaScore":3,"healthScore":45,"healthTips":["Add a side salad"]}
        "#;
        let result = parse_analysis(text).unwrap();

        assert_eq!(result.meal_name, "Pizza Margherita");
        assert_eq!(result.total_calories, 650);
        assert_eq!(result.macros.protein, 25.5);
        assert_eq!(result.nova_score, 3);
    }

    #[test]
    fn test_parse_analysis_rejects_bad_output() {
        assert!(parse_analysis("").is_err());
        assert!(parse_analysis("Sorry, I cannot see any food here.").is_err());
        // missing required fields
        assert!(parse_analysis(r#"{"mealName":"Soup"}"#).is_err());
        // out of range
        let text = r#"{"mealName":"x","description":"x","totalCalories":1,
            "macros":{"protein":1,"carbohydrates":1,"fat":1},"micronutrients":[],
            "novaScore":7,"healthScore":50,"healthTips":[]}"#;
        assert!(parse_analysis(text).is_err());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "Hello");

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn test_stream_event_sources_replace_not_merge() {
        let mut sources = None;

        let first = parse_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"Greek yogurt "}]}}]}"#,
            &mut sources,
        )
        .unwrap();
        assert_eq!(first.text, "Greek yogurt ");
        assert!(first.sources.is_none());

        let second = parse_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"with berries"}]},
                "groundingMetadata":{"groundingChunks":[
                    {"web":{"uri":"https://a.example","title":"A"}},
                    {"web":{"uri":"https://b.example","title":"B"}}]}}]}"#,
            &mut sources,
        )
        .unwrap();
        assert_eq!(second.sources.as_ref().unwrap().len(), 2);

        // no grounding on this event: previous sources carry over
        let third = parse_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"."}]}}]}"#,
            &mut sources,
        )
        .unwrap();
        assert_eq!(third.sources, second.sources);

        let fourth = parse_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":""}]},
                "groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://c.example","title":"C"}}]}}]}"#,
            &mut sources,
        )
        .unwrap();
        assert_eq!(
            fourth.sources,
            Some(vec![Source { uri: "https://c.example".into(), title: "C".into() }])
        );
    }

    #[test]
    fn test_stream_event_ignores_empty_grounding() {
        let mut sources = Some(vec![Source { uri: "https://a.example".into(), title: "A".into() }]);
        let chunk = parse_stream_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"x"}]},"groundingMetadata":{"groundingChunks":[{}]}}]}"#,
            &mut sources,
        )
        .unwrap();

        assert_eq!(chunk.sources.unwrap()[0].title, "A");
    }

    #[test]
    fn test_stream_event_errors() {
        let mut sources = None;
        assert!(matches!(
            parse_stream_event("not json", &mut sources),
            Err(ChatError::Parse(_))
        ));
        assert!(matches!(
            parse_stream_event(r#"{"error":{"code":429,"message":"quota"}}"#, &mut sources),
            Err(ChatError::Api { status: 429, .. })
        ));
    }

    #[test]
    fn test_sse_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::default();

        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        let events = decoder.feed(b"1}\r\n\r\ndata: {\"b\":2}\r\n\r\nda");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);

        assert!(decoder.feed(b"ta: {\"c\":3}").is_empty());
        assert_eq!(decoder.finish(), Some("{\"c\":3}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_text_intact() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"t\":\"café\"}\n".as_bytes();
        let (head, tail) = line.split_at(line.len() - 4);

        assert!(decoder.feed(head).is_empty());
        assert_eq!(decoder.feed(tail), vec!["{\"t\":\"café\"}".to_string()]);
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new("key".into(), "gemini-2.5-flash".into())
            .with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(
            client.endpoint("generateContent"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    /// Runs the real client against a local axum server standing in for Gemini.
    #[cfg(feature = "web-server")]
    mod over_http {
        use super::*;
        use axum::{
            extract::{Path, Query, State},
            http::{HeaderMap, StatusCode},
            response::IntoResponse,
            routing::post,
            Router,
        };
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex};

        #[derive(Debug, Clone)]
        struct Recorded {
            call: String,
            api_key: Option<String>,
            alt: Option<String>,
            body: serde_json::Value,
        }

        #[derive(Clone)]
        struct FakeGemini {
            status: StatusCode,
            content_type: &'static str,
            body: String,
            seen: Arc<Mutex<Vec<Recorded>>>,
        }

        async fn fake_endpoint(
            State(fake): State<FakeGemini>,
            Path(call): Path<String>,
            Query(query): Query<HashMap<String, String>>,
            headers: HeaderMap,
            body: String,
        ) -> impl IntoResponse {
            fake.seen.lock().unwrap().push(Recorded {
                call,
                api_key: headers
                    .get("x-goog-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                alt: query.get("alt").cloned(),
                body: serde_json::from_str(&body).unwrap_or_default(),
            });
            (fake.status, [("content-type", fake.content_type)], fake.body)
        }

        async fn serve(
            status: StatusCode,
            content_type: &'static str,
            body: impl Into<String>,
        ) -> (GeminiClient, Arc<Mutex<Vec<Recorded>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let app = Router::new()
                .route("/v1beta/models/:call", post(fake_endpoint))
                .with_state(FakeGemini {
                    status,
                    content_type,
                    body: body.into(),
                    seen: seen.clone(),
                });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let client = GeminiClient::new("test-key".into(), "gemini-test".into())
                .with_base_url(format!("http://{}/v1beta/", addr));
            (client, seen)
        }

        fn question() -> ChatTurnRequest {
            ChatTurnRequest {
                system_instruction: "Be helpful".to_string(),
                search_grounding: true,
                history: vec![],
                message: "Is brown rice healthy?".to_string(),
            }
        }

        async fn drain(mut stream: FragmentStream) -> Vec<Result<ChatChunk, ChatError>> {
            let mut items = Vec::new();
            while let Some(item) = stream.next().await {
                items.push(item);
            }
            items
        }

        fn image() -> ImagePayload {
            ImagePayload::from_bytes(b"\x89PNG\r\n\x1a\n", "image/png").unwrap()
        }

        #[tokio::test]
        async fn test_stream_chat_reads_every_frame() {
            // last frame has no trailing newline
            let body = concat!(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Brown rice \"}]}}]}\r\n\r\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"has fiber\"}]},",
                "\"groundingMetadata\":{\"groundingChunks\":[{\"web\":{\"uri\":\"https://rice.example\",\"title\":\"Rice\"}}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\".\"}]}}]}",
            );
            let (client, seen) = serve(StatusCode::OK, "text/event-stream", body).await;

            let stream = client.stream_chat(question()).await.unwrap();
            let chunks: Vec<ChatChunk> = drain(stream).await.into_iter().map(|c| c.unwrap()).collect();

            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(texts, vec!["Brown rice ", "has fiber", "."]);
            assert!(chunks[0].sources.is_none());
            assert_eq!(chunks[1].sources.as_ref().unwrap()[0].uri, "https://rice.example");
            assert_eq!(chunks[2].sources, chunks[1].sources);

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].call, "gemini-test:streamGenerateContent");
            assert_eq!(seen[0].alt.as_deref(), Some("sse"));
            assert_eq!(seen[0].api_key.as_deref(), Some("test-key"));
            assert_eq!(seen[0].body["systemInstruction"]["parts"][0]["text"], "Be helpful");
            assert!(seen[0].body["tools"][0]["googleSearch"].is_object());
        }

        #[tokio::test]
        async fn test_stream_chat_empty_body_is_interrupted() {
            let (client, _) = serve(StatusCode::OK, "text/event-stream", "").await;

            let items = drain(client.stream_chat(question()).await.unwrap()).await;

            assert_eq!(items.len(), 1);
            assert!(matches!(items[0], Err(ChatError::Interrupted)));
        }

        #[tokio::test]
        async fn test_stream_chat_error_status() {
            let (client, _) = serve(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "boom").await;

            let Err(err) = client.stream_chat(question()).await else {
                panic!("expected the request to fail");
            };
            assert!(matches!(&err, ChatError::Api { status: 500, message } if message == "boom"));
            assert_eq!(err.to_string(), "API error: 500 - boom");
        }

        #[tokio::test]
        async fn test_stream_chat_error_event_ends_stream() {
            let body = concat!(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Part\"}]}}]}\n\n",
                "data: {\"error\":{\"code\":429,\"message\":\"quota exceeded\"}}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"never\"}]}}]}\n\n",
            );
            let (client, _) = serve(StatusCode::OK, "text/event-stream", body).await;

            let items = drain(client.stream_chat(question()).await.unwrap()).await;

            assert_eq!(items.len(), 2);
            assert_eq!(items[0].as_ref().unwrap().text, "Part");
            assert!(matches!(&items[1], Err(ChatError::Api { status: 429, .. })));
        }

        #[tokio::test]
        async fn test_analysis_over_http() {
            let analysis = serde_json::json!({
                "mealName": "Rice Bowl",
                "description": "Brown rice with vegetables",
                "totalCalories": 520,
                "macros": { "protein": 14, "carbohydrates": 88, "fat": 9 },
                "micronutrients": [{ "name": "Magnesium", "amount": 80, "unit": "mg" }],
                "novaScore": 1,
                "healthScore": 78,
                "healthTips": ["Add a protein source"]
            });
            let body = serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": analysis.to_string() }] } }]
            });
            let (client, seen) = serve(StatusCode::OK, "application/json", body.to_string()).await;

            let result = client.analyze_food_image(&image()).await.unwrap();

            assert_eq!(result.meal_name, "Rice Bowl");
            assert_eq!(result.total_calories, 520);
            assert_eq!(result.micronutrients[0].unit, "mg");

            let seen = seen.lock().unwrap();
            assert_eq!(seen[0].call, "gemini-test:generateContent");
            assert_eq!(seen[0].alt, None);
            assert_eq!(seen[0].body["contents"][0]["parts"][0]["inlineData"]["data"], "iVBORw0KGgo=");
            assert_eq!(seen[0].body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        }

        #[tokio::test]
        async fn test_analysis_error_status_fails() {
            let (client, _) = serve(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "boom").await;

            let err = client.analyze_food_image(&image()).await.unwrap_err();

            assert_eq!(err.to_string(), crate::services::ai_service::ANALYSIS_FAILED_MESSAGE);
            assert!(matches!(&err, AnalysisError::Failed { cause } if cause.contains("500") && cause.contains("boom")));
        }

        #[tokio::test]
        async fn test_analysis_out_of_range_score_fails() {
            let analysis = r#"{"mealName":"x","description":"x","totalCalories":1,
                "macros":{"protein":1,"carbohydrates":1,"fat":1},"micronutrients":[],
                "novaScore":7,"healthScore":50,"healthTips":[]}"#;
            let body = serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": analysis }] } }]
            });
            let (client, _) = serve(StatusCode::OK, "application/json", body.to_string()).await;

            let err = client.analyze_food_image(&image()).await.unwrap_err();

            assert!(matches!(&err, AnalysisError::Failed { cause } if cause.contains("novaScore")));
        }
    }
}

