//! Rewrites `<@U123>` / `<@U123|label>` mention tokens into `@name`

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::directory::UserDirectory;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@(\w+)(?:\|[^>]*)?>").expect("mention pattern compiles"));

/// Distinct mentioned user ids, in order of first appearance
pub fn mention_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in MENTION.captures_iter(text) {
        let id = &caps[1];
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Replace every mention token with `@` + the user's name.
///
/// Each distinct id is resolved once. A token whose id cannot be resolved is
/// left as is. Replacement is a single pass, so a name that itself looks like
/// a token is not expanded again.
pub async fn rewrite_mentions(text: &str, directory: &mut UserDirectory) -> String {
    let ids = mention_ids(text);
    if ids.is_empty() {
        return text.to_string();
    }

    let mut names = HashMap::with_capacity(ids.len());
    for id in ids {
        match directory.resolve(&id).await {
            Ok(user) => {
                names.insert(id, user.name);
            }
            Err(e) => warn!(action = "mention.unresolved", user = %id, error = %e),
        }
    }

    MENTION
        .replace_all(text, |caps: &Captures| match names.get(&caps[1]) {
            Some(name) => format!("@{name}"),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use std::sync::Arc;

    fn directory(platform: &FakePlatform) -> UserDirectory {
        UserDirectory::new(Arc::new(platform.clone()))
    }

    #[test]
    fn test_mention_ids_are_distinct_and_ordered() {
        let ids = mention_ids("<@U2> then <@U1|bob> then <@U2|carol> and <#C1|general>");
        assert_eq!(ids, vec!["U2", "U1"]);
    }

    #[test]
    fn test_no_mentions() {
        assert!(mention_ids("plain text, an email <mailto:a@b.c>").is_empty());
    }

    #[tokio::test]
    async fn test_rewrites_plain_and_labelled_mentions() {
        let platform = FakePlatform::new()
            .with_user("U123", "alice")
            .with_user("U456", "bob");
        let mut dir = directory(&platform);

        let text = rewrite_mentions("hello <@U123> and <@U456|label>", &mut dir).await;

        assert_eq!(text, "hello @alice and @bob");
    }

    #[tokio::test]
    async fn test_repeated_mention_resolves_once() {
        let platform = FakePlatform::new().with_user("U1", "alice");
        let mut dir = directory(&platform);

        let text = rewrite_mentions("<@U1> <@U1|alice> <@U1>", &mut dir).await;

        assert_eq!(text, "@alice @alice @alice");
        assert_eq!(platform.lookups(), vec!["U1"]);
    }

    #[tokio::test]
    async fn test_rewritten_text_is_unchanged_by_second_pass() {
        let platform = FakePlatform::new().with_user("U1", "alice");
        let mut dir = directory(&platform);

        let once = rewrite_mentions("ping <@U1>", &mut dir).await;
        let twice = rewrite_mentions(&once, &mut dir).await;

        assert_eq!(once, twice);
        assert_eq!(platform.lookups().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_keeps_token() {
        let platform = FakePlatform::new().with_user("U1", "alice");
        let mut dir = directory(&platform);

        let text = rewrite_mentions("<@U1> and <@UGHOST|ghost>", &mut dir).await;

        assert_eq!(text, "@alice and <@UGHOST|ghost>");
    }

    #[tokio::test]
    async fn test_text_without_mentions_makes_no_lookups() {
        let platform = FakePlatform::new();
        let mut dir = directory(&platform);

        let text = rewrite_mentions("nothing to see", &mut dir).await;

        assert_eq!(text, "nothing to see");
        assert!(platform.lookups().is_empty());
    }
}
