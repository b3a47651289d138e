use clap::Subcommand;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use agentdesk_core::chat::StreamFrame;

use crate::util::{Target, api_request, connection_error, exit_code_for, request};

#[derive(Subcommand)]
pub enum ChatCommands {
    /// Relay a message upstream and print the reply frames as JSON lines
    Send {
        #[arg(long)]
        message: String,
        /// Continue this upstream conversation instead of the remembered one
        #[arg(long)]
        conversation_id: Option<String>,
        /// Sent as the option value; used when --message is blank
        #[arg(long)]
        option_value: Option<String>,
    },
    /// Fetch the newest answer above an id
    Messages {
        #[arg(long, default_value_t = 0)]
        last_id: u64,
    },
    /// Forget conversation state (and this session's forms)
    Reset,
}

pub async fn run(target: &Target<'_>, command: ChatCommands) -> i32 {
    match command {
        ChatCommands::Send {
            message,
            conversation_id,
            option_value,
        } => {
            let mut body = json!({"message": message});
            if let Some(id) = conversation_id {
                body["conversation_id"] = json!(id);
            }
            if let Some(value) = option_value {
                body["option_value"] = json!(value);
            }
            send(target, body).await
        }
        ChatCommands::Messages { last_id } => {
            api_request(
                target,
                reqwest::Method::POST,
                "/api/messages",
                Some(json!({"last_message_id": last_id})),
                &[],
                false,
            )
            .await
        }
        ChatCommands::Reset => {
            api_request(target, reqwest::Method::POST, "/reset", None, &[], false).await
        }
    }
}

async fn send(target: &Target<'_>, body: Value) -> i32 {
    let req = match request(target, reqwest::Method::POST, "/post", &[]) {
        Ok(r) => r.json(&body),
        Err(code) => return code,
    };
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let is_stream = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    if !is_stream {
        // Batch mode reply or an error envelope
        let exit_code = exit_code_for(resp.status().as_u16());
        let reply: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
        };
        let formatted = serde_json::to_string_pretty(&reply).unwrap_or_else(|_| reply.to_string());
        if exit_code == 0 {
            println!("{formatted}");
        } else {
            eprintln!("{formatted}");
        }
        return exit_code;
    }

    let mut outcome = None;
    let mut stream = std::pin::pin!(frames(resp.bytes_stream()));
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(EventStreamError::Transport(e)) => return connection_error(&e),
            Err(e) => {
                eprintln!("{}", json!({"error": "stream_error", "message": e.to_string()}));
                return 2;
            }
        };
        println!("{}", json!(frame));
        if frame.is_terminal() {
            outcome = Some(frame);
        }
    }

    match outcome {
        Some(StreamFrame::Complete { .. }) => 0,
        Some(_) => 2,
        None => {
            eprintln!(
                "{}",
                json!({"error": "stream_error", "message": "Stream ended without a final frame"})
            );
            2
        }
    }
}

/// Decode the `/post` event stream into frames. Events whose data is not a
/// known frame are skipped.
fn frames<S, B, E>(body: S) -> impl Stream<Item = Result<StreamFrame, EventStreamError<E>>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    body.eventsource().filter_map(|event| async move {
        match event {
            Ok(event) => serde_json::from_str(&event.data).ok().map(Ok),
            Err(e) => Some(Err(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static str>) -> Vec<StreamFrame> {
        let body = futures_util::stream::iter(
            chunks.into_iter().map(Ok::<_, std::convert::Infallible>),
        );
        frames(body)
            .map(|frame| frame.expect("stream decodes"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn frames_are_reassembled_across_chunks() {
        let frames = collect(vec![
            "data: {\"type\":\"ch",
            "unk\",\"chunk\":\"Hi\"}\r\n\r\n:\n\n",
            "data: {\"type\":\"complete\",\"answer\":\"Hi\",\"conversation_id\":\"c-1\"}\n\n",
        ])
        .await;
        assert_eq!(
            frames,
            [
                StreamFrame::Chunk { chunk: "Hi".into() },
                StreamFrame::Complete {
                    answer: "Hi".into(),
                    conversation_id: "c-1".into(),
                },
            ]
        );
        assert!(frames[1].is_terminal());
    }

    #[tokio::test]
    async fn unknown_payloads_are_skipped() {
        let frames = collect(vec![
            "data: {\"type\":\"other\"}\n\n",
            "data: not json\n\n",
            "data: {\"type\":\"error\",\"message\":\"upstream down\"}\n\n",
        ])
        .await;
        assert_eq!(
            frames,
            [StreamFrame::Error {
                message: "upstream down".into()
            }]
        );
    }
}
