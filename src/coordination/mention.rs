//! Avatar mention detection.
//!
//! Names and aliases match case-insensitively on word boundaries ("Ada" does
//! not match "Adam"); emoji match anywhere in the text.

use crate::collaborators::Avatar;

/// Avatars named in `text`, in the order they first appear.
pub fn mentioned_avatars<'a>(text: &str, avatars: &'a [Avatar]) -> Vec<&'a Avatar> {
    let haystack = text.to_lowercase();
    let mut hits: Vec<(usize, &Avatar)> = avatars
        .iter()
        .filter_map(|avatar| first_mention(&haystack, avatar).map(|pos| (pos, avatar)))
        .collect();
    hits.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.id.cmp(&b.id)));
    hits.into_iter().map(|(_, avatar)| avatar).collect()
}

/// Whether `text` mentions this avatar.
pub fn mentions(text: &str, avatar: &Avatar) -> bool {
    first_mention(&text.to_lowercase(), avatar).is_some()
}

/// Earliest byte offset of any of the avatar's handles in `haystack` (lowercased).
fn first_mention(haystack: &str, avatar: &Avatar) -> Option<usize> {
    let words = std::iter::once(&avatar.name)
        .chain(avatar.aliases.iter())
        .filter_map(|w| find_word(haystack, &w.to_lowercase()));

    let emoji = avatar
        .emoji
        .as_deref()
        .filter(|e| !e.is_empty())
        .and_then(|e| haystack.find(e));

    words.chain(emoji).min()
}

fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.trim().is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_word_char(c));
        if before_ok && after_ok {
            return Some(start);
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
