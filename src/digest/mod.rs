//! Digest document rendering.
//!
//! Turns collected topic digests into one HTML document (subject + body)
//! and replicates it per recipient into the message sequence fed to the
//! dispatcher.

use chrono::{DateTime, FixedOffset, Utc};

use crate::errors::DispatchResult;
use crate::feed::TopicDigest;
use crate::types::{ContentKind, Message};

/// A rendered digest document.
#[derive(Debug, Clone)]
pub struct Digest {
    /// Subject line shared by every recipient.
    pub subject: String,
    /// HTML body.
    pub html: String,
}

/// Renders collected feeds into a digest document.
#[derive(Debug, Clone)]
pub struct DigestRenderer {
    display_offset: FixedOffset,
}

impl DigestRenderer {
    /// Creates a renderer displaying entry timestamps at the given fixed
    /// UTC offset (in hours, clamped to a valid offset).
    pub fn new(display_offset_hours: i32) -> Self {
        let seconds = display_offset_hours.clamp(-23, 23) * 3600;
        let display_offset =
            FixedOffset::east_opt(seconds).expect("clamped offset is in range");
        Self { display_offset }
    }

    /// Renders the digest document for today.
    pub fn render(&self, topics: &[TopicDigest]) -> Digest {
        let today = Utc::now()
            .with_timezone(&self.display_offset)
            .format("%Y-%m-%d")
            .to_string();

        let mut html = vec![
            concat!(
                "<style>",
                "body { font-family: 'Segoe UI', Helvetica, Arial, sans-serif; line-height:1.6; }",
                "h2 { color:#333; }",
                "h3 { color:#2b6cb0; margin-top:1em; }",
                "a { text-decoration:none; color:#1a73e8; }",
                "a:hover { text-decoration:underline; }",
                "</style>"
            )
            .to_string(),
            format!("<h2>Daily digest for {}</h2>", today),
            "<hr style='border:none;border-top:2px solid #ddd;'>".to_string(),
        ];

        for topic in topics {
            html.push(format!("<h3>{}</h3>", escape(&topic_heading(&topic.topic))));

            for source in &topic.sources {
                html.push(format!(
                    "<p><b>{}</b></p><ul style='margin-top:0;margin-bottom:1em;'>",
                    escape(&source.source_title)
                ));

                if source.entries.is_empty() {
                    html.push("<li>No updates</li>".to_string());
                }

                for entry in &source.entries {
                    let published = entry
                        .published
                        .as_deref()
                        .map(|raw| self.format_timestamp(raw))
                        .unwrap_or_else(|| "unknown date".to_string());

                    html.push(format!(
                        "<li style='margin-bottom:6px;'>\
                         <a href='{}' target='_blank'>{}</a> \
                         <small style='color:#666;'>({})</small>\
                         </li>",
                        escape(&entry.link),
                        escape(&entry.title),
                        escape(&published),
                    ));
                }

                html.push("</ul>".to_string());
            }

            html.push("<hr style='border:none;border-top:1px dashed #ccc;'>".to_string());
        }

        html.push(
            "<p style='font-size:0.9em;color:#999;'>Generated automatically by digest-dispatch</p>"
                .to_string(),
        );

        Digest {
            subject: format!("Daily digest for {}", today),
            html: html.join("\n"),
        }
    }

    /// Normalizes a feed timestamp into the display offset.
    ///
    /// Feeds state dates in whatever dialect they like; RFC 2822 and
    /// RFC 3339 are tried in turn and anything else passes through verbatim.
    pub fn format_timestamp(&self, raw: &str) -> String {
        let parsed = DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw));

        match parsed {
            Ok(dt) => dt
                .with_timezone(&self.display_offset)
                .format("%b %-d, %Y · %H:%M %:z")
                .to_string(),
            Err(_) => raw.to_string(),
        }
    }
}

/// Replicates the digest once per recipient.
pub fn to_messages(digest: &Digest, recipients: &[String]) -> DispatchResult<Vec<Message>> {
    recipients
        .iter()
        .map(|recipient| {
            Message::builder()
                .recipient(recipient.clone())
                .subject(digest.subject.clone())
                .body(digest.html.clone())
                .content(ContentKind::Html)
                .build()
        })
        .collect()
}

fn topic_heading(topic: &str) -> String {
    topic
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Minimal HTML escaping for text and attribute values.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
