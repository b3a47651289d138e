use serde_json::{Value, json};

/// Header the API reads the caller's session key from.
pub const SESSION_HEADER: &str = "x-session-id";

/// Where requests go and which session they speak for.
pub struct Target<'a> {
    pub api_url: &'a str,
    pub session: Option<&'a str>,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn print_json(value: &Value, to_stderr: bool) {
    let formatted = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if to_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    print_json(&err, true);
    std::process::exit(4);
}

/// Parse a JSON command-line argument or exit with a usage error.
pub fn parse_json_arg(flag: &str, raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => exit_error(
            &format!("Invalid JSON in {flag}: {e}"),
            Some("Quote the value, e.g. --data '{\"selected_value\":\"a\"}'"),
        ),
    }
}

/// Exit code for an HTTP status: 0=2xx, 1=4xx, 2=anything else.
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

pub fn build_url(api_url: &str, path: &str, query: &[(String, String)]) -> Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/')))
        .map_err(|e| format!("Invalid URL: {api_url}{path}: {e}"))?;
    if !query.is_empty() {
        let mut q = url.query_pairs_mut();
        for (k, v) in query {
            q.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Start a request against the API with the session header applied.
/// Returns the usage exit code when the URL is unusable.
pub fn request(
    target: &Target<'_>,
    method: reqwest::Method,
    path: &str,
    query: &[(String, String)],
) -> Result<reqwest::RequestBuilder, i32> {
    let url = match build_url(target.api_url, path, query) {
        Ok(u) => u,
        Err(message) => {
            print_json(&json!({"error": "cli_error", "message": message}), true);
            return Err(4);
        }
    };
    let mut req = client().request(method, url);
    if let Some(session) = target.session {
        req = req.header(SESSION_HEADER, session);
    }
    Ok(req)
}

/// Report a failed connection and return its exit code.
pub fn connection_error(err: &reqwest::Error) -> i32 {
    print_json(
        &json!({
            "error": "connection_error",
            "message": format!("{err}"),
            "docs_hint": "Is the API server running? Check AGENTDESK_API_URL."
        }),
        true,
    );
    3
}

/// Execute an API request, print the JSON response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    target: &Target<'_>,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
    query: &[(String, String)],
    raw: bool,
) -> i32 {
    let mut req = match request(target, method, path, query) {
        Ok(r) => r,
        Err(code) => return code,
    };
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let exit_code = exit_code_for(resp.status().as_u16());
    let resp_body: Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if raw {
        let line = resp_body.to_string();
        if exit_code == 0 {
            println!("{line}");
        } else {
            eprintln!("{line}");
        }
    } else {
        print_json(&resp_body, exit_code != 0);
    }

    exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_exit_code() {
        assert_eq!(exit_code_for(200), 0);
        assert_eq!(exit_code_for(204), 0);
        assert_eq!(exit_code_for(404), 1);
        assert_eq!(exit_code_for(409), 1);
        assert_eq!(exit_code_for(502), 2);
        assert_eq!(exit_code_for(504), 2);
    }

    #[test]
    fn url_joins_base_path_and_query() {
        let url = build_url(
            "http://localhost:5008/",
            "/api/notify",
            &[("question".into(), "Room A & B?".into())],
        )
        .expect("valid url");
        assert_eq!(url.path(), "/api/notify");
        assert_eq!(url.query(), Some("question=Room+A+%26+B%3F"));
    }

    #[test]
    fn bad_base_url_is_reported() {
        assert!(build_url("not a url", "/api/forms", &[]).is_err());
    }
}
