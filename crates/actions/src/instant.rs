//! Layer 1 — instant resolver
//!
//! Closed set of intents answered deterministically: date and time,
//! day-of-week, arithmetic, identity/help, greeting, and recent-memory
//! recall from the interaction log. Every match terminates the pipeline.

use chrono::{DateTime, Local, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::calc::evaluate_expression;

/// A resolved instant answer
#[derive(Debug, Clone)]
pub struct InstantResponse {
    pub intent: &'static str,
    pub text: String,
}

/// Read-only view of recent interactions, implemented by the driver's
/// interaction log
pub trait RecentRecall: Send + Sync {
    /// Most recent (message, response) pairs for a user, newest first
    fn recent(&self, user_id: &str, limit: usize) -> Vec<(String, String)>;
}

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhat('s| is)? (the )?time\b|\bwhat time is it\b").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwhat('s| is)? (the |today's )?date\b|\bwhat day of the month\b").unwrap()
});
static DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhat day is (it|today)\b|\bday of the week\b").unwrap());
static MATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:what(?:'s| is)\s+|calculate\s+|compute\s+)?([0-9(][0-9+\-*/x×÷().%\s]*)\??$")
        .unwrap()
});
static IDENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwho are you\b|\bwhat are you\b|\bwhat can you do\b|\bhelp\b").unwrap()
});
static GREETING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(hi|hello|hey|yo|good (morning|afternoon|evening|night))[!. ]*$").unwrap()
});
static RECALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwhat did (i|we) (ask|say|talk about)\b|\bremind me what\b").unwrap()
});

/// Layer 1 resolver
pub struct InstantResolver {
    assistant_name: String,
}

impl InstantResolver {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self { assistant_name: assistant_name.into() }
    }

    /// Try to answer instantly. `None` falls through to Layer 2.
    pub fn resolve(
        &self,
        message: &str,
        user_name: Option<&str>,
        recall: Option<&dyn RecentRecall>,
        user_id: Option<&str>,
    ) -> Option<InstantResponse> {
        self.resolve_at(message, user_name, recall, user_id, Local::now())
    }

    /// Clock-injected variant for tests
    pub fn resolve_at(
        &self,
        message: &str,
        user_name: Option<&str>,
        recall: Option<&dyn RecentRecall>,
        user_id: Option<&str>,
        now: DateTime<Local>,
    ) -> Option<InstantResponse> {
        let trimmed = message.trim();

        // Empty message: greet if there is nothing else to go on.
        if trimmed.is_empty() {
            return Some(InstantResponse {
                intent: "empty",
                text: "I didn't catch anything — what can I do for you?".to_string(),
            });
        }

        if TIME_RE.is_match(trimmed) {
            let (hour, minute) = (now.hour(), now.minute());
            let (hour12, meridiem) = to_12h(hour);
            return Some(InstantResponse {
                intent: "time",
                text: format!("It's {}:{:02} {}.", hour12, minute, meridiem),
            });
        }

        if DATE_RE.is_match(trimmed) {
            return Some(InstantResponse {
                intent: "date",
                text: format!("Today is {}.", now.format("%B %-d, %Y")),
            });
        }

        if DAY_RE.is_match(trimmed) {
            return Some(InstantResponse {
                intent: "day_of_week",
                text: format!("It's {}.", now.format("%A")),
            });
        }

        if let Some(captures) = MATH_RE.captures(trimmed) {
            let expression = captures.get(1)?.as_str();
            // Require an operator so "42" alone is not an equation.
            if expression.chars().any(|c| "+-*/x×÷%".contains(c)) {
                if let Some(value) = evaluate_expression(expression) {
                    return Some(InstantResponse {
                        intent: "arithmetic",
                        text: format!("That's {}.", format_number(value)),
                    });
                }
            }
        }

        if GREETING_RE.is_match(trimmed) {
            let daypart = match now.hour() {
                5..=11 => "Good morning",
                12..=16 => "Good afternoon",
                17..=21 => "Good evening",
                _ => "Hello",
            };
            let text = match user_name {
                Some(name) => format!("{}, {}! What can I do for you?", daypart, name),
                None => format!("{}! What can I do for you?", daypart),
            };
            return Some(InstantResponse { intent: "greeting", text });
        }

        if RECALL_RE.is_match(trimmed) {
            let user_id = user_id?;
            let recall = recall?;
            let recent = recall.recent(user_id, 3);
            if recent.is_empty() {
                return Some(InstantResponse {
                    intent: "recall",
                    text: "We haven't talked about anything yet in this session.".to_string(),
                });
            }
            let summary: Vec<String> =
                recent.iter().map(|(message, _)| format!("\"{}\"", message)).collect();
            return Some(InstantResponse {
                intent: "recall",
                text: format!("Recently you asked about {}.", summary.join(", ")),
            });
        }

        // Identity/help only fires on short direct asks; "help me write an
        // essay" belongs to the model.
        if trimmed.split_whitespace().count() <= 6 && IDENTITY_RE.is_match(trimmed) {
            return Some(InstantResponse {
                intent: "identity",
                text: format!(
                    "I'm {}, your home assistant. I can answer questions, control your \
                     devices, remember your preferences, and chat.",
                    self.assistant_name
                ),
            });
        }

        None
    }
}

fn to_12h(hour: u32) -> (u32, &'static str) {
    match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    }
}

fn format_number(value: f64) -> String {
    if (value.fract()).abs() < 1e-9 {
        format!("{}", value as i64)
    } else {
        format!("{:.4}", value).trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resolver() -> InstantResolver {
        InstantResolver::new("Atlas")
    }

    fn at_hour(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 10, hour, 30, 0).unwrap()
    }

    #[test]
    fn time_intent_contains_the_clock() {
        let r = resolver()
            .resolve_at("what time is it?", None, None, None, at_hour(15))
            .unwrap();
        assert_eq!(r.intent, "time");
        assert!(r.text.contains("3:30 PM"));
    }

    #[test]
    fn date_and_day() {
        let r = resolver().resolve_at("what's the date", None, None, None, at_hour(9)).unwrap();
        assert_eq!(r.intent, "date");
        assert!(r.text.contains("June"));

        let r = resolver().resolve_at("what day is it", None, None, None, at_hour(9)).unwrap();
        assert_eq!(r.intent, "day_of_week");
        assert!(r.text.contains("Tuesday"));
    }

    #[test]
    fn arithmetic_requires_an_operator() {
        let r = resolver().resolve_at("what is 2+2?", None, None, None, at_hour(9)).unwrap();
        assert_eq!(r.intent, "arithmetic");
        assert!(r.text.contains('4'));

        assert!(resolver().resolve_at("42", None, None, None, at_hour(9)).is_none());
    }

    #[test]
    fn greeting_is_daypart_and_name_aware() {
        let r = resolver()
            .resolve_at("good morning", Some("Ada"), None, None, at_hour(8))
            .unwrap();
        assert!(r.text.starts_with("Good morning, Ada"));

        let r = resolver().resolve_at("hey", None, None, None, at_hour(19)).unwrap();
        assert!(r.text.starts_with("Good evening"));
    }

    #[test]
    fn empty_message_asks_for_input() {
        let r = resolver().resolve_at("  ", None, None, None, at_hour(9)).unwrap();
        assert_eq!(r.intent, "empty");
    }

    #[test]
    fn recall_reads_the_interaction_log() {
        struct FakeLog;
        impl RecentRecall for FakeLog {
            fn recent(&self, _user: &str, _limit: usize) -> Vec<(String, String)> {
                vec![("the moon".to_string(), "384,400 km away".to_string())]
            }
        }
        let r = resolver()
            .resolve_at("what did I ask about?", None, Some(&FakeLog), Some("u1"), at_hour(9))
            .unwrap();
        assert_eq!(r.intent, "recall");
        assert!(r.text.contains("the moon"));
    }

    #[test]
    fn open_questions_fall_through() {
        assert!(resolver()
            .resolve_at("explain quantum tunnelling in depth", None, None, None, at_hour(9))
            .is_none());
    }
}
