use clap::{Subcommand, ValueEnum};
use serde_json::{Value, json};

use crate::util::{Target, api_request, exit_error, parse_json_arg};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormType {
    /// Progress update, shown once
    Update,
    /// Pick one of the options
    Choice,
    /// Fill in the fields named by the options
    Input,
}

impl FormType {
    fn code(self) -> &'static str {
        match self {
            FormType::Update => "0",
            FormType::Choice => "1",
            FormType::Input => "2",
        }
    }
}

#[derive(Subcommand)]
pub enum FormsCommands {
    /// List pending forms for this session
    List,
    /// Stage a form the way the workflow system does
    Notify {
        #[arg(long = "type", value_enum, default_value = "choice")]
        form_type: FormType,
        #[arg(long)]
        question: String,
        #[arg(long)]
        message: Option<String>,
        /// JSON array of {"value", "text"} options
        #[arg(long)]
        options: Option<String>,
        /// JSON object carried by update forms
        #[arg(long)]
        update_data: Option<String>,
        /// Stage the form for another session key
        #[arg(long = "for-session")]
        for_session: Option<String>,
    },
    /// Answer one pending form
    Submit {
        #[arg(long)]
        form_id: String,
        /// Answer as JSON, e.g. '{"selected_value":"a"}'
        #[arg(long, default_value = "{}")]
        data: String,
        /// Send this text instead of the rendered answer
        #[arg(long)]
        full_message: Option<String>,
    },
    /// Answer several forms at once
    SubmitAll {
        /// JSON object mapping form id to its answer
        #[arg(long)]
        data: String,
        #[arg(long)]
        combined_message: Option<String>,
    },
    /// Drop every pending form of this session
    Clear,
}

pub async fn run(target: &Target<'_>, command: FormsCommands) -> i32 {
    match command {
        FormsCommands::List => {
            api_request(target, reqwest::Method::GET, "/api/forms", None, &[], false).await
        }
        FormsCommands::Notify {
            form_type,
            question,
            message,
            options,
            update_data,
            for_session,
        } => {
            let query = notify_query(
                form_type,
                &question,
                message.as_deref(),
                options.as_deref(),
                update_data.as_deref(),
                for_session.as_deref(),
            );
            api_request(target, reqwest::Method::GET, "/api/notify", None, &query, false).await
        }
        FormsCommands::Submit {
            form_id,
            data,
            full_message,
        } => {
            let form_data = parse_json_arg("--data", &data);
            if !form_data.is_object() {
                exit_error("--data must be a JSON object", None);
            }
            let mut body = json!({"form_id": form_id, "form_data": form_data});
            if let Some(text) = full_message {
                body["full_message"] = json!(text);
            }
            api_request(
                target,
                reqwest::Method::POST,
                "/api/submit_form",
                Some(body),
                &[],
                false,
            )
            .await
        }
        FormsCommands::SubmitAll {
            data,
            combined_message,
        } => {
            let form_data = parse_json_arg("--data", &data);
            if !form_data.is_object() {
                exit_error(
                    "--data must be a JSON object keyed by form id",
                    Some("e.g. --data '{\"form_0191...\":{\"selected_value\":\"a\"}}'"),
                );
            }
            let mut body = json!({"form_data": form_data});
            if let Some(text) = combined_message {
                body["combined_message"] = json!(text);
            }
            api_request(
                target,
                reqwest::Method::POST,
                "/api/submit_all",
                Some(body),
                &[],
                false,
            )
            .await
        }
        FormsCommands::Clear => {
            api_request(
                target,
                reqwest::Method::POST,
                "/api/clear_forms",
                None,
                &[],
                false,
            )
            .await
        }
    }
}

/// Query string of a notify call. JSON arguments are validated here so a
/// typo fails locally instead of being dropped by the server.
fn notify_query(
    form_type: FormType,
    question: &str,
    message: Option<&str>,
    options: Option<&str>,
    update_data: Option<&str>,
    for_session: Option<&str>,
) -> Vec<(String, String)> {
    let mut query = vec![
        ("type".to_string(), form_type.code().to_string()),
        ("question".to_string(), question.to_string()),
    ];
    if let Some(m) = message {
        query.push(("message".to_string(), m.to_string()));
    }
    if let Some(raw) = options {
        let value: Value = parse_json_arg("--options", raw);
        query.push(("options".to_string(), value.to_string()));
    }
    if let Some(raw) = update_data {
        let value: Value = parse_json_arg("--update-data", raw);
        query.push(("update_data".to_string(), value.to_string()));
    }
    if let Some(s) = for_session {
        query.push(("session".to_string(), s.to_string()));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_types_map_to_wire_codes() {
        assert_eq!(FormType::Update.code(), "0");
        assert_eq!(FormType::Choice.code(), "1");
        assert_eq!(FormType::Input.code(), "2");
    }

    #[test]
    fn notify_query_normalizes_json_arguments() {
        let query = notify_query(
            FormType::Choice,
            "Which room?",
            None,
            Some(r#"[ {"value": "a", "text": "Room A"} ]"#),
            None,
            Some("tab-2"),
        );
        let keys: Vec<&str> = query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["type", "question", "options", "session"]);
        assert_eq!(query[0].1, "1");
        let options: Value = serde_json::from_str(&query[2].1).expect("compact JSON");
        assert_eq!(options, json!([{"value": "a", "text": "Room A"}]));
        assert!(query[2].1.starts_with("[{"));
        assert_eq!(query[3].1, "tab-2");
    }
}
