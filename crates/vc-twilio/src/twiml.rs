//! TwiML response documents

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Content type for TwiML responses
pub const CONTENT_TYPE: &str = "application/xml";

/// How long a call is held open while waiting for the next instruction
pub const KEEP_ALIVE_SECS: u32 = 120;

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn document(body: &str) -> String {
    format!("{}<Response>{}</Response>", XML_HEADER, body)
}

fn say_element(text: &str, voice: Option<&str>, language: Option<&str>) -> String {
    let mut attrs = String::new();
    if let Some(voice) = voice {
        attrs.push_str(&format!(r#" voice="{}""#, escape_xml(voice)));
    }
    if let Some(language) = language {
        attrs.push_str(&format!(r#" language="{}""#, escape_xml(language)));
    }
    format!("<Say{}>{}</Say>", attrs, escape_xml(text))
}

fn pause_element(secs: u32) -> String {
    format!(r#"<Pause length="{}"/>"#, secs)
}

/// Empty response; acknowledges a status callback
pub fn empty() -> String {
    document("")
}

/// Hold the call open
pub fn keep_alive() -> String {
    document(&pause_element(KEEP_ALIVE_SECS))
}

/// Refuse an inbound call
pub fn reject() -> String {
    document(r#"<Reject reason="rejected"/>"#)
}

/// Bridge the call audio to a media stream websocket
pub fn connect_stream(stream_url: &str, parameters: &[(&str, &str)]) -> String {
    let params: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                escape_xml(name),
                escape_xml(value)
            )
        })
        .collect();
    document(&format!(
        r#"<Connect><Stream url="{}">{}</Stream></Connect>"#,
        escape_xml(stream_url),
        params
    ))
}

/// Speak, then keep the call open for the next instruction
pub fn say(text: &str, voice: Option<&str>, language: Option<&str>) -> String {
    document(&format!(
        "{}{}",
        say_element(text, voice, language),
        pause_element(KEEP_ALIVE_SECS)
    ))
}

/// Speak, then end the call (notify mode without a media stream)
pub fn say_and_hangup(text: &str, voice: Option<&str>) -> String {
    document(&format!("{}<Hangup/>", say_element(text, voice, None)))
}

/// Collect one utterance; Twilio posts `SpeechResult` to `action_url`.
///
/// A `prompt` is spoken inside the `<Gather>`, so the caller can answer
/// while it plays and the listen window opens only once it is heard.
pub fn gather_speech(
    action_url: &str,
    language: Option<&str>,
    prompt: Option<&str>,
    voice: Option<&str>,
) -> String {
    let language_attr = language
        .map(|l| format!(r#" language="{}""#, escape_xml(l)))
        .unwrap_or_default();
    let open = format!(
        r#"<Gather input="speech" speechTimeout="auto" method="POST" action="{}"{}"#,
        escape_xml(action_url),
        language_attr
    );
    let gather = match prompt {
        Some(prompt) => format!(
            "{}>{}</Gather>",
            open,
            say_element(prompt, voice, language)
        ),
        None => format!("{}/>", open),
    };
    document(&format!("{}{}", gather, pause_element(KEEP_ALIVE_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape_xml(r#"Tom & "Jerry" <3"#), "Tom &amp; &quot;Jerry&quot; &lt;3");
    }

    #[test]
    fn test_connect_stream() {
        let xml = connect_stream("wss://example.com/voice/stream", &[("callId", "c-1")]);
        assert!(xml.starts_with(XML_HEADER));
        assert!(xml.contains(r#"<Stream url="wss://example.com/voice/stream">"#));
        assert!(xml.contains(r#"<Parameter name="callId" value="c-1"/>"#));
    }

    #[test]
    fn test_say_escapes_text() {
        let xml = say("Fish & chips", Some("Polly.Joanna"), None);
        assert!(xml.contains(r#"<Say voice="Polly.Joanna">Fish &amp; chips</Say>"#));
        assert!(xml.contains("<Pause"));
    }

    #[test]
    fn test_gather_action_is_escaped() {
        let xml = gather_speech(
            "https://example.com/hook?callId=a&flow=gather",
            Some("en-US"),
            None,
            None,
        );
        assert!(xml.contains(r#"action="https://example.com/hook?callId=a&amp;flow=gather""#));
        assert!(xml.contains(r#"language="en-US""#));
        assert!(xml.contains("/><Pause"));
    }

    #[test]
    fn test_gather_wraps_prompt() {
        let xml = gather_speech("https://example.com/hook", None, Some("Lights off?"), Some("alice"));
        assert!(xml.contains(
            r#"action="https://example.com/hook"><Say voice="alice">Lights off?</Say></Gather>"#
        ));
        assert_eq!(xml.matches("<Say").count(), 1);
    }

    #[test]
    fn test_say_and_hangup() {
        assert!(say_and_hangup("Bye", None).ends_with("<Say>Bye</Say><Hangup/></Response>"));
    }
}
