//! Topic name and topic filter validation
//!
//! Publish topics must be concrete names; subscription topics may be filters
//! using the `+` single-level and `#` multi-level wildcards.

use thiserror::Error;

/// Topic length limit imposed by the two-byte length prefix on the wire
pub const MAX_TOPIC_LEN: usize = 65_535;

pub fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    check_common(topic)?;

    if let Some(ch) = topic.chars().find(|c| *c == '+' || *c == '#') {
        return Err(ValidationError::WildcardInTopicName(ch));
    }

    Ok(())
}

pub fn validate_topic_filter(filter: &str) -> Result<(), ValidationError> {
    check_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(ValidationError::MisplacedMultiLevelWildcard);
        }
        if level.contains('+') && *level != "+" {
            return Err(ValidationError::MisplacedSingleLevelWildcard);
        }
    }

    Ok(())
}

fn check_common(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(ValidationError::NullCharacter);
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes, limit is 65535")]
    TopicTooLong(usize),
    #[error("Topic contains a NUL character")]
    NullCharacter,
    #[error("Wildcard '{0}' is not allowed in a publish topic")]
    WildcardInTopicName(char),
    #[error("'#' must occupy the whole final level of a filter")]
    MisplacedMultiLevelWildcard,
    #[error("'+' must occupy a whole level of a filter")]
    MisplacedSingleLevelWildcard,
}
