//! HTTP client tests against in-process servers
//!
//! `GatewayClient` is exercised against a real gateway bound to a local port;
//! the provider clients against small mock provider APIs.

use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use secrecy::SecretString;
use tokio::net::TcpListener;

use parley::api::ApiServerBuilder;
use parley::persona::Persona;
use parley::providers::{
    ChatCompletion, ChatProvider, ConversationClient, GatewayClient, SpeechSynthesizer,
    SpeechToText, SttProvider, TextToSpeech, TranscriptionClient, TtsProvider,
};
use parley::voice::{AudioBlob, AudioEncoding, SAMPLE_RATE, encode_recording};
use parley::{Error, SessionState, Toggle, Turn, VoiceSessionBuilder};

mod common;
use common::{
    FakeCapture, FakeConversation, FakeSpeech, FakeSynthesizer, FakeTranscriber, Script,
    summarize,
};

/// Serve `router` on an ephemeral local port and return its base URL
async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}")
}

async fn spawn_gateway(
    transcriber: Arc<FakeTranscriber>,
    conversation: Arc<FakeConversation>,
    synthesizer: Arc<FakeSynthesizer>,
) -> GatewayClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServerBuilder::new(transcriber, conversation, synthesizer).build();
    tokio::spawn(server.serve(listener));

    GatewayClient::new(format!("http://{addr}/")).unwrap()
}

fn wav(bytes: &[u8]) -> AudioBlob {
    AudioBlob::new(bytes.to_vec(), AudioEncoding::Wav)
}

#[tokio::test]
async fn test_gateway_round_trip() {
    let transcriber = FakeTranscriber::replying("hallo");
    let conversation = FakeConversation::replying("Hallo! Wie geht's?");
    let synthesizer = FakeSynthesizer::returning(b"ID3-mp3");
    let client = spawn_gateway(
        transcriber.clone(),
        conversation.clone(),
        synthesizer.clone(),
    )
    .await;

    assert_eq!(client.transcribe(wav(b"RIFF-data")).await.unwrap(), "hallo");
    {
        let received = transcriber.received.lock().unwrap();
        assert_eq!(received[0].as_bytes(), b"RIFF-data");
        assert_eq!(received[0].encoding(), AudioEncoding::Wav);
    }

    let history = vec![Turn::user("hallo")];
    assert_eq!(
        client.complete(&history).await.unwrap(),
        "Hallo! Wie geht's?"
    );
    assert_eq!(
        summarize(&conversation.histories()[0]),
        vec![("user".to_string(), "hallo".to_string())]
    );

    let audio = client.synthesize("Hallo!").await.unwrap();
    assert_eq!(audio.encoding(), AudioEncoding::Mpeg);
    assert_eq!(audio.as_bytes(), b"ID3-mp3");
}

#[tokio::test]
async fn test_gateway_errors_map_to_stage_kinds() {
    let client = spawn_gateway(
        FakeTranscriber::new(
            Script::new(String::new()).then(Err(Error::TranscriptionFailed("upstream 401".into()))),
        ),
        FakeConversation::new(
            Script::new(String::new()).then(Err(Error::CompletionFailed("upstream 429".into()))),
        ),
        FakeSynthesizer::new(
            Script::new(Vec::new()).then(Err(Error::SynthesisFailed("upstream 500".into()))),
        ),
    )
    .await;

    match client.transcribe(wav(b"RIFF")).await.unwrap_err() {
        Error::TranscriptionFailed(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("upstream 401"));
        }
        other => panic!("unexpected {other:?}"),
    }

    match client.complete(&[Turn::user("hi")]).await.unwrap_err() {
        Error::CompletionFailed(message) => {
            assert!(message.contains("Chat is currently unavailable"));
        }
        other => panic!("unexpected {other:?}"),
    }

    match client.synthesize("hi").await.unwrap_err() {
        Error::SynthesisFailed(message) => assert!(message.contains("upstream 500")),
        other => panic!("unexpected {other:?}"),
    }

    // A 400 is a failure too
    match client.synthesize("  ").await.unwrap_err() {
        Error::SynthesisFailed(message) => assert!(message.contains("Empty text")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_empty_audio_short_circuits() {
    let transcriber = FakeTranscriber::replying("never");
    let client = spawn_gateway(
        transcriber.clone(),
        FakeConversation::replying("hi"),
        FakeSynthesizer::returning(b"mp3"),
    )
    .await;

    assert!(matches!(
        client.transcribe(wav(b"")).await,
        Err(Error::EmptyAudio)
    ));
    assert_eq!(transcriber.script.calls(), 0);
}

#[tokio::test]
async fn test_unreachable_gateway() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GatewayClient::new(format!("http://{addr}")).unwrap();
    assert!(matches!(
        client.complete(&[Turn::user("hi")]).await,
        Err(Error::CompletionFailed(_))
    ));
}

#[tokio::test]
async fn test_session_through_gateway() {
    let client = Arc::new(
        spawn_gateway(
            FakeTranscriber::replying("hello"),
            FakeConversation::replying("hi there"),
            FakeSynthesizer::returning(b"mp3"),
        )
        .await,
    );
    let speech = FakeSpeech::ok();

    let session = VoiceSessionBuilder::new(
        Box::new(FakeCapture::with_audio(b"RIFF-hello")),
        client.clone(),
        client,
        speech.clone(),
    )
    .build();

    assert_eq!(session.toggle().await.unwrap(), Toggle::Recording);
    assert!(matches!(session.toggle().await.unwrap(), Toggle::Replied(_)));

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(
        summarize(&session.transcript()),
        vec![
            ("user".to_string(), "hello".to_string()),
            ("assistant".to_string(), "hi there".to_string()),
        ]
    );
    assert_eq!(speech.spoken(), vec!["hi there".to_string()]);
}

#[tokio::test]
async fn test_silent_recording_through_gateway() {
    let transcriber = FakeTranscriber::replying("never");
    let client = Arc::new(
        spawn_gateway(
            transcriber.clone(),
            FakeConversation::replying("hi"),
            FakeSynthesizer::returning(b"mp3"),
        )
        .await,
    );

    // What the microphone produces when stopped before any samples arrive
    let silent = encode_recording(&[], 1, SAMPLE_RATE).unwrap();
    let session = VoiceSessionBuilder::new(
        Box::new(FakeCapture::with_audio(silent.as_bytes())),
        client.clone(),
        client,
        FakeSpeech::ok(),
    )
    .build();

    session.toggle().await.unwrap();
    let err = session.toggle().await.unwrap_err();

    assert!(matches!(err, Error::EmptyAudio));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.transcript().is_empty());
    assert_eq!(transcriber.script.calls(), 0);
}

/// What a mock provider saw
#[derive(Default)]
struct Seen {
    bodies: Mutex<Vec<serde_json::Value>>,
    fields: Mutex<Vec<(String, String)>>,
    auth: Mutex<Vec<String>>,
}

fn record_auth(seen: &Seen, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .or_else(|| headers.get("xi-api-key"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    seen.auth.lock().unwrap().push(value);
}

fn mock_provider(seen: Arc<Seen>) -> Router {
    async fn transcriptions(
        State(seen): State<Arc<Seen>>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> Json<serde_json::Value> {
        record_auth(&seen, &headers);
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let value = if name == "file" {
                field.file_name().unwrap_or_default().to_string()
            } else {
                field.text().await.unwrap()
            };
            seen.fields.lock().unwrap().push((name, value));
        }
        Json(serde_json::json!({"text": "guten Morgen"}))
    }

    async fn completions(
        State(seen): State<Arc<Seen>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        record_auth(&seen, &headers);
        seen.bodies.lock().unwrap().push(body);
        Json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Guten Morgen!"}}]
        }))
    }

    async fn speech(
        State(seen): State<Arc<Seen>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Vec<u8> {
        record_auth(&seen, &headers);
        seen.bodies.lock().unwrap().push(body);
        b"ID3-speech".to_vec()
    }

    Router::new()
        .route("/audio/transcriptions", post(transcriptions))
        .route("/chat/completions", post(completions))
        .route("/audio/speech", post(speech))
        .route("/text-to-speech/{voice}", post(speech))
        .with_state(seen)
}

fn failing_provider() -> Router {
    async fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": {"message": "Invalid API Key"}})),
        )
    }

    Router::new()
        .route("/audio/transcriptions", post(unauthorized))
        .route("/chat/completions", post(unauthorized))
        .route("/audio/speech", post(unauthorized))
}

fn key() -> SecretString {
    SecretString::from("test-key".to_string())
}

#[tokio::test]
async fn test_whisper_upload() {
    let seen = Arc::new(Seen::default());
    let url = spawn(mock_provider(seen.clone())).await;

    let stt = SpeechToText::new(SttProvider::Groq, key(), None)
        .unwrap()
        .with_base_url(url);

    assert_eq!(stt.transcribe(wav(b"RIFF")).await.unwrap(), "guten Morgen");

    let fields = seen.fields.lock().unwrap().clone();
    assert!(fields.contains(&("file".to_string(), "recording.wav".to_string())));
    assert!(fields.contains(&("model".to_string(), "whisper-large-v3".to_string())));
    assert_eq!(seen.auth.lock().unwrap()[0], "Bearer test-key");
}

#[tokio::test]
async fn test_chat_prepends_persona() {
    let seen = Arc::new(Seen::default());
    let url = spawn(mock_provider(seen.clone())).await;

    let chat = ChatCompletion::new(
        ChatProvider::Groq,
        key(),
        None,
        Persona::new("tutor", "Answer in German."),
    )
    .unwrap()
    .with_base_url(url);

    let history = vec![Turn::user("good morning")];
    assert_eq!(chat.complete(&history).await.unwrap(), "Guten Morgen!");

    let body = seen.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "llama-3.3-70b-versatile");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "Answer in German.");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "good morning");
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_tts_providers() {
    let seen = Arc::new(Seen::default());
    let url = spawn(mock_provider(seen.clone())).await;

    let openai = TextToSpeech::new(TtsProvider::OpenAi, key(), "alloy".to_string(), None)
        .unwrap()
        .with_base_url(url.clone());
    let audio = openai.synthesize("Ciao!").await.unwrap();
    assert_eq!(audio.encoding(), AudioEncoding::Mpeg);
    assert_eq!(audio.as_bytes(), b"ID3-speech");

    let elevenlabs = TextToSpeech::new(TtsProvider::ElevenLabs, key(), "voice-1".to_string(), None)
        .unwrap()
        .with_base_url(url);
    elevenlabs.synthesize("Bonjour").await.unwrap();

    let bodies = seen.bodies.lock().unwrap().clone();
    assert_eq!(bodies[0]["model"], "tts-1");
    assert_eq!(bodies[0]["voice"], "alloy");
    assert_eq!(bodies[0]["input"], "Ciao!");
    assert_eq!(bodies[1]["text"], "Bonjour");
    assert_eq!(bodies[1]["model_id"], "eleven_multilingual_v2");

    let auth = seen.auth.lock().unwrap().clone();
    assert_eq!(auth[0], "Bearer test-key");
    assert_eq!(auth[1], "test-key");
}

#[tokio::test]
async fn test_provider_errors() {
    let url = spawn(failing_provider()).await;

    let stt = SpeechToText::new(SttProvider::OpenAi, key(), None)
        .unwrap()
        .with_base_url(url.clone());
    match stt.transcribe(wav(b"RIFF")).await.unwrap_err() {
        Error::TranscriptionFailed(message) => {
            assert!(message.contains("401"));
            assert!(message.contains("Invalid API Key"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let chat = ChatCompletion::new(ChatProvider::OpenAi, key(), None, Persona::default())
        .unwrap()
        .with_base_url(url.clone());
    assert!(matches!(
        chat.complete(&[Turn::user("hi")]).await,
        Err(Error::CompletionFailed(_))
    ));

    let tts = TextToSpeech::new(TtsProvider::OpenAi, key(), "alloy".to_string(), None)
        .unwrap()
        .with_base_url(url);
    assert!(matches!(
        tts.synthesize("hi").await,
        Err(Error::SynthesisFailed(_))
    ));
}
