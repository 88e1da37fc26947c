use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_CHAT_NAME_LENGTH: usize = 100;

/// A direct (two-party) or group conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: String,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Direct => "direct",
            ChatKind::Group => "group",
        }
    }
}

impl TryFrom<&str> for ChatKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "direct" => Ok(ChatKind::Direct),
            "group" => Ok(ChatKind::Group),
            other => Err(format!("unknown chat kind {other:?}")),
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Chat {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChatKind::Group)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a chat together with its initial participants.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: String,
    /// Everyone except the creator; duplicates and the creator are ignored.
    pub participant_ids: Vec<String>,
}

impl NewChat {
    /// Participants other than the creator, deduplicated and in input order.
    pub fn other_participants(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.participant_ids.len());
        for id in &self.participant_ids {
            let id = id.trim();
            if id.is_empty() || id == self.created_by || seen.iter().any(|s: &String| s == id) {
                continue;
            }
            seen.push(id.to_string());
        }
        seen
    }

    /// Key that makes a direct chat unique per unordered pair of users.
    pub fn direct_key(&self) -> Option<String> {
        match (self.kind, self.other_participants().as_slice()) {
            (ChatKind::Direct, [other]) => Some(direct_key(&self.created_by, other)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.created_by.trim().is_empty() {
            return Err("creator is required".to_string());
        }

        let others = self.other_participants();
        match self.kind {
            ChatKind::Direct => {
                if others.len() != 1 {
                    return Err("a direct chat needs exactly one other participant".to_string());
                }
                if self.name.is_some() {
                    return Err("direct chats cannot be named".to_string());
                }
            }
            ChatKind::Group => {
                let name = self.name.as_deref().map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err("group chats need a name".to_string());
                }
                if name.chars().count() > MAX_CHAT_NAME_LENGTH {
                    return Err(format!(
                        "chat name cannot exceed {MAX_CHAT_NAME_LENGTH} characters"
                    ));
                }
            }
        }

        Ok(())
    }
}

pub fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: Option<&str>, participants: &[&str]) -> NewChat {
        NewChat {
            kind: ChatKind::Group,
            name: name.map(str::to_string),
            created_by: "alice".to_string(),
            participant_ids: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_chat_kind_conversion() {
        assert_eq!(ChatKind::try_from("direct").unwrap(), ChatKind::Direct);
        assert_eq!(ChatKind::try_from("GROUP").unwrap(), ChatKind::Group);
        assert!(ChatKind::try_from("channel").is_err());
        assert_eq!(ChatKind::Group.to_string(), "group");
    }

    #[test]
    fn test_direct_key_ignores_order() {
        assert_eq!(direct_key("bob", "alice"), direct_key("alice", "bob"));
        assert_eq!(direct_key("alice", "bob"), "alice:bob");
    }

    #[test]
    fn test_other_participants_drops_creator_and_duplicates() {
        let chat = group(Some("team"), &["bob", "alice", "bob", " ", "carol"]);
        assert_eq!(chat.other_participants(), vec!["bob", "carol"]);
    }

    #[test]
    fn test_direct_chat_validation() {
        let mut chat = NewChat {
            kind: ChatKind::Direct,
            name: None,
            created_by: "alice".to_string(),
            participant_ids: vec!["bob".to_string()],
        };
        assert!(chat.validate().is_ok());
        assert_eq!(chat.direct_key().as_deref(), Some("alice:bob"));

        chat.participant_ids.push("carol".to_string());
        assert!(chat.validate().is_err());
        assert!(chat.direct_key().is_none());

        chat.participant_ids = vec!["alice".to_string()];
        assert!(chat.validate().is_err());
    }

    #[test]
    fn test_group_chat_validation() {
        assert!(group(Some("team"), &[]).validate().is_ok());
        assert!(group(None, &["bob"]).validate().is_err());
        assert!(group(Some("   "), &["bob"]).validate().is_err());
        let long = "x".repeat(MAX_CHAT_NAME_LENGTH + 1);
        assert!(group(Some(&long), &["bob"]).validate().is_err());
    }
}
