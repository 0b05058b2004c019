use crate::{error::ApiError, openai::api::ChatRequest};

/// Largest number of choices one request may ask for.
pub const MAX_CHOICES: u32 = 128;

/// Parses and checks a chat completion request. Every problem found is
/// reported, not only the first.
pub fn parse_request(body: &[u8]) -> Result<ChatRequest, ApiError> {
    let req: ChatRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    let problems = check(&req);
    if problems.is_empty() {
        Ok(req)
    } else {
        Err(ApiError::InvalidRequest(problems.join(". ")))
    }
}

fn check_range(problems: &mut Vec<String>, name: &str, value: Option<f64>, min: f64, max: f64) {
    if let Some(value) = value {
        if !(min..=max).contains(&value) {
            problems.push(format!("\"{name}\" must be between {min} and {max}"));
        }
    }
}

fn check_positive(problems: &mut Vec<String>, name: &str, value: Option<u32>) {
    if value == Some(0) {
        problems.push(format!("\"{name}\" must be greater than or equal to 1"));
    }
}

fn check(req: &ChatRequest) -> Vec<String> {
    let mut problems = Vec::new();

    if req.messages.is_empty() {
        problems.push("\"messages\" must contain at least 1 items".to_string());
    }
    check_range(&mut problems, "temperature", req.temperature, 0.0, 2.0);
    check_range(&mut problems, "top_p", req.top_p, 0.0, 1.0);
    check_range(&mut problems, "presence_penalty", req.presence_penalty, -2.0, 2.0);
    check_range(&mut problems, "frequency_penalty", req.frequency_penalty, -2.0, 2.0);
    check_range(
        &mut problems,
        "top_logprobs",
        req.top_logprobs.map(f64::from),
        0.0,
        20.0,
    );
    check_positive(&mut problems, "n", req.n);
    if req.n.is_some_and(|n| n > MAX_CHOICES) {
        problems.push(format!("\"n\" must be less than or equal to {MAX_CHOICES}"));
    }
    check_positive(&mut problems, "max_tokens", req.max_tokens);
    check_positive(&mut problems, "max_completion_tokens", req.max_completion_tokens);

    if let Some(bias) = &req.logit_bias {
        for (token, value) in bias {
            if !value.is_number() {
                problems.push(format!("\"logit_bias.{token}\" must be a number"));
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn parse(value: Value) -> Result<ChatRequest, ApiError> {
        parse_request(&serde_json::to_vec(&value).unwrap())
    }

    fn message(err: ApiError) -> String {
        match err {
            ApiError::InvalidRequest(message) => message,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn minimal_request() {
        let req = parse(json!({
            "model": "gpt-x",
            "messages": [{ "role": "user", "content": "hello" }]
        }))
        .unwrap();
        assert_eq!(req.choice_count(), 1);
        assert!(!req.is_stream());
    }

    #[test]
    fn missing_messages() {
        let err = message(parse(json!({ "model": "gpt-x" })).unwrap_err());
        assert!(err.contains("messages"), "{err}");
    }

    #[test]
    fn empty_messages() {
        let err = message(parse(json!({ "model": "gpt-x", "messages": [] })).unwrap_err());
        assert_eq!(err, "\"messages\" must contain at least 1 items");
    }

    #[test]
    fn missing_content_and_bad_role() {
        assert!(parse(json!({ "model": "m", "messages": [{ "role": "user" }] })).is_err());
        assert!(
            parse(json!({ "model": "m", "messages": [{ "role": "bot", "content": "x" }] }))
                .is_err()
        );
    }

    #[test]
    fn ranges_are_collected() {
        let err = message(
            parse(json!({
                "model": "m",
                "messages": [{ "role": "user", "content": "x" }],
                "temperature": 2.5,
                "top_p": -0.1,
                "presence_penalty": 3,
                "frequency_penalty": -2,
                "top_logprobs": 21,
                "n": 0,
                "max_tokens": 0
            }))
            .unwrap_err(),
        );
        assert!(err.contains("\"temperature\" must be between 0 and 2"), "{err}");
        assert!(err.contains("\"top_p\""), "{err}");
        assert!(err.contains("\"presence_penalty\""), "{err}");
        assert!(!err.contains("\"frequency_penalty\""), "{err}");
        assert!(err.contains("\"top_logprobs\""), "{err}");
        assert!(err.contains("\"n\""), "{err}");
        assert!(err.contains("\"max_tokens\""), "{err}");
    }

    #[test]
    fn logit_bias_values_must_be_numbers() {
        let err = message(
            parse(json!({
                "model": "m",
                "messages": [{ "role": "user", "content": "x" }],
                "logit_bias": { "50256": -100, "42": "high" }
            }))
            .unwrap_err(),
        );
        assert_eq!(err, "\"logit_bias.42\" must be a number");
    }

    #[test]
    fn choice_count_is_bounded() {
        let request = |n: u64| json!({ "model": "m", "n": n, "messages": [{ "role": "user", "content": "x" }] });
        assert_eq!(parse(request(128)).unwrap().choice_count(), 128);
        assert_eq!(
            message(parse(request(129)).unwrap_err()),
            "\"n\" must be less than or equal to 128"
        );
        assert!(parse(request(u32::MAX as u64)).is_err());
    }
}
