//! Scripted API traffic for pipeline tests.

use serde_json::Value;
use social_api_client::testing::{comment_json, post_json, ScriptedTransport};

pub const WALL_GET: &str = "wall.get";
pub const WALL_GET_COMMENTS: &str = "wall.getComments";

/// Queue one posts page answering for a whole group.
pub fn script_posts(transport: &ScriptedTransport, owner_id: i64, posts: &[(i64, u64)]) {
    let items: Vec<Value> = posts
        .iter()
        .map(|(post_id, comments)| post_json(*post_id, owner_id, *comments))
        .collect();
    let total = items.len() as u64;
    transport.push(WALL_GET, ScriptedTransport::list(items, total));
}

/// Queue the comment pages of one post, `page_size` comments per page.
///
/// Comment ids start at `first_id`; `text_for` picks each comment's text.
pub fn script_comments(
    transport: &ScriptedTransport,
    first_id: i64,
    count: u64,
    page_size: usize,
    text_for: impl Fn(i64) -> String,
) {
    let comments: Vec<Value> = (0..count as i64)
        .map(|i| {
            let id = first_id + i;
            comment_json(id, 1000 + id, &text_for(id))
        })
        .collect();

    for chunk in comments.chunks(page_size.max(1)) {
        transport.push(WALL_GET_COMMENTS, ScriptedTransport::list(chunk.to_vec(), count));
    }
}

pub fn friendly_text(id: i64) -> String {
    format!("great community post number {} thanks everyone", id)
}
