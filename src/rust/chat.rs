//! Minimal command-line chat client for a hosted language-model messages API.
//!
//! Each turn is one request carrying the whole in-memory conversation. There is no
//! retry, streaming or persistence.

use std::env;
use std::io::{BufRead, Write};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
pub const API_VERSION: &str = "2023-06-01";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Please set the {0} environment variable")]
    MissingCredential(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Response contained no text")]
    EmptyReply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            api_key_env: API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// Extracts the reply text from a messages API response body.
pub fn parse_reply(body: &str) -> Result<String, ChatError> {
    let response: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        debug!("Unparseable response body: {}", body);
        ChatError::Api { status: 200, body: format!("malformed response: {}", e) }
    })?;
    response
        .content
        .into_iter()
        .find_map(|block| block.text)
        .map(|text| text.trim().to_string())
        .ok_or(ChatError::EmptyReply)
}

pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
    api_key: String,
    messages: Vec<Message>,
}

impl ChatClient {
    pub fn new(config: ChatConfig, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            api_key: api_key.into(),
            messages: Vec::new(),
        }
    }

    /// Reads the API key from the environment variable named in `config`.
    pub fn from_env(config: ChatConfig) -> Result<Self, ChatError> {
        let api_key = env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ChatError::MissingCredential(config.api_key_env.clone()))?;
        Ok(Self::new(config, api_key))
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    fn request(&self) -> MessagesRequest<'_> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: &self.messages,
        }
    }

    /// Sends one user turn. The turn is only kept in the history when the call succeeds.
    pub async fn send(&mut self, text: &str) -> Result<String, ChatError> {
        self.messages.push(Message { role: Role::User, content: text.to_string() });
        match self.post().await {
            Ok(reply) => {
                self.messages.push(Message { role: Role::Assistant, content: reply.clone() });
                Ok(reply)
            }
            Err(e) => {
                self.messages.pop();
                Err(e)
            }
        }
    }

    async fn post(&self) -> Result<String, ChatError> {
        debug!("Sending {} messages to {}", self.messages.len(), self.config.endpoint);
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.request())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Api { status: status.as_u16(), body });
        }
        parse_reply(&body)
    }
}

/// What the REPL should do with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Quit,
    Skip,
    Send(&'a str),
}

pub fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Command::Skip
    } else if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        Command::Quit
    } else {
        Command::Send(trimmed)
    }
}

/// Runs the interactive loop until `exit`, `quit` or end of input. Failed turns are
/// reported and the loop continues.
pub async fn run_repl<R: BufRead, W: Write>(client: &mut ChatClient, mut input: R, mut output: W) -> std::io::Result<()> {
    writeln!(output, "Chat CLI - type 'exit' or 'quit' to leave")?;
    writeln!(output, "---------------------------------------------")?;

    loop {
        write!(output, "chat > ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }

        match parse_command(&line) {
            Command::Skip => continue,
            Command::Quit => {
                writeln!(output, "Exiting chat.")?;
                break;
            }
            Command::Send(text) => match client.send(text).await {
                Ok(reply) => writeln!(output, "\nAssistant:\n{}\n", reply)?,
                Err(e) => {
                    error!("Chat turn failed: {}", e);
                    writeln!(output, "Error: {}", e)?;
                }
            },
        }
    }
    info!("Chat session ended after {} messages", client.history().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  \n"), Command::Skip);
        assert_eq!(parse_command("EXIT\n"), Command::Quit);
        assert_eq!(parse_command("quit"), Command::Quit);
        assert_eq!(parse_command(" hello there \n"), Command::Send("hello there"));
    }

    #[test]
    fn test_parse_reply() {
        let body = r#"{"id":"msg_1","content":[{"type":"text","text":"  Hi!\n"}],"role":"assistant"}"#;
        assert_eq!(parse_reply(body).unwrap(), "Hi!");
        assert!(matches!(parse_reply(r#"{"content":[]}"#), Err(ChatError::EmptyReply)));
        assert!(matches!(parse_reply("oops"), Err(ChatError::Api { .. })));
    }

    #[test]
    fn test_request_body() {
        let mut client = ChatClient::new(ChatConfig::default(), "key");
        client.messages.push(Message { role: Role::User, content: "hello".into() });
        let body = serde_json::to_value(client.request()).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_missing_credential() {
        let config = ChatConfig {
            api_key_env: "ARTHROLENS_TEST_UNSET_API_KEY".to_string(),
            ..ChatConfig::default()
        };
        assert!(matches!(ChatClient::from_env(config), Err(ChatError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn test_failed_turn_is_dropped() {
        let config = ChatConfig {
            endpoint: "http://127.0.0.1:9/v1/messages".to_string(),
            ..ChatConfig::default()
        };
        let mut client = ChatClient::new(config, "key");
        assert!(client.send("hello").await.is_err());
        assert!(client.history().is_empty());
    }

    /// Serves one canned HTTP response per connection and hands back each request body.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1/messages", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                let body_start = loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&request[..body_start]).to_ascii_lowercase();
                let length: usize = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .map(|value| value.trim().parse().unwrap())
                    .unwrap_or(0);
                while request.len() < body_start + length {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                }
                tx.send(String::from_utf8_lossy(&request[body_start..]).to_string()).unwrap();

                let response = format!(
                    "HTTP/1.1 {} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (endpoint, rx)
    }

    #[tokio::test]
    async fn test_api_error_then_reply() {
        let (endpoint, mut requests) = serve(vec![
            (500, r#"{"error":"overloaded"}"#),
            (200, r#"{"content":[{"type":"text","text":" Joint space narrowing. "}]}"#),
        ])
        .await;
        let mut client = ChatClient::new(ChatConfig { endpoint, ..ChatConfig::default() }, "key");

        let err = client.send("first").await.unwrap_err();
        assert!(matches!(err, ChatError::Api { status: 500, ref body } if body.contains("overloaded")));
        assert!(client.history().is_empty());
        let sent: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
        assert_eq!(sent["messages"][0]["content"], "first");

        let reply = client.send("second").await.unwrap();
        assert_eq!(reply, "Joint space narrowing.");
        assert_eq!(
            client.history(),
            [
                Message { role: Role::User, content: "second".into() },
                Message { role: Role::Assistant, content: "Joint space narrowing.".into() },
            ]
        );
        // the failed turn is not resent
        let sent: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
        assert_eq!(sent["messages"].as_array().unwrap().len(), 1);
        assert_eq!(sent["messages"][0]["content"], "second");
    }

    #[test]
    fn test_repl_quits_without_sending() {
        let mut client = ChatClient::new(ChatConfig::default(), "key");
        let mut output = Vec::new();
        tokio_test::block_on(run_repl(&mut client, "\n  \nquit\n".as_bytes(), &mut output)).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Exiting chat."));
        assert!(client.history().is_empty());
    }
}
