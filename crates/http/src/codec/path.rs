//! Request targets: splitting, percent coding and dot-segment removal.

use crate::protocol::{ParseError, QueryItem};
use crate::utils::ensure;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Bytes escaped in a path. `/` stays literal.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Bytes escaped in a query name or value.
const QUERY_COMPONENT: &AsciiSet = &PATH.add(b'&').add(b'=').add(b'+').add(b'\'');

/// Splits a request target into its normalised path and decoded query items.
///
/// Dot segments are removed before percent-decoding, so `%2E%2E` and `%2F`
/// decode to literal text inside a segment instead of moving up a level or
/// splitting it.
pub(crate) fn parse_target(target: &str) -> Result<(String, Vec<QueryItem>), ParseError> {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    let path = strip_authority(path);

    let path = if path == "*" {
        path.to_string()
    } else if path.is_empty() {
        "/".to_string()
    } else {
        ensure!(path.starts_with('/'), ParseError::InvalidUri);
        let normalised = remove_dot_segments(path);
        percent_decode_str(&normalised).decode_utf8().map_err(|_utf8| ParseError::InvalidUri)?.into_owned()
    };

    Ok((path, query.map(parse_query).unwrap_or_default()))
}

/// Drops the `scheme://authority` prefix of an absolute-form target.
fn strip_authority(path: &str) -> &str {
    let Some(index) = path.find("://") else {
        return path;
    };
    if !path[..index].bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.')) {
        return path;
    }
    let rest = &path[index + 3..];
    rest.find('/').map_or("", |slash| &rest[slash..])
}

fn parse_query(query: &str) -> Vec<QueryItem> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            QueryItem::new(percent_decode_str(name).decode_utf8_lossy(), percent_decode_str(value).decode_utf8_lossy())
        })
        .collect()
}

/// RFC 3986 §5.2.4.
pub(crate) fn remove_dot_segments(path: &str) -> String {
    let mut input = path;
    let mut output = String::with_capacity(path.len());

    while !input.is_empty() {
        if let Some(rest) = input.strip_prefix("../") {
            input = rest;
        } else if let Some(rest) = input.strip_prefix("./") {
            input = rest;
        } else if input.starts_with("/./") {
            input = &input[2..];
        } else if input == "/." {
            input = "/";
        } else if input.starts_with("/../") {
            input = &input[3..];
            pop_segment(&mut output);
        } else if input == "/.." {
            input = "/";
            pop_segment(&mut output);
        } else if input == "." || input == ".." {
            input = "";
        } else {
            let start = usize::from(input.starts_with('/'));
            let end = input[start..].find('/').map_or(input.len(), |slash| slash + start);
            output.push_str(&input[..end]);
            input = &input[end..];
        }
    }
    output
}

fn pop_segment(output: &mut String) {
    let cut = output.rfind('/').unwrap_or(0);
    output.truncate(cut);
}

/// The wire form of `path` and `query`.
pub(crate) fn encode_target(path: &str, query: &[QueryItem]) -> String {
    let mut target: String = utf8_percent_encode(path, PATH).collect();
    if target.is_empty() {
        target.push('/');
    }

    for (index, item) in query.iter().enumerate() {
        target.push(if index == 0 { '?' } else { '&' });
        target.extend(utf8_percent_encode(&item.name, QUERY_COMPONENT));
        target.push('=');
        target.extend(utf8_percent_encode(&item.value, QUERY_COMPONENT));
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_segments() {
        assert_eq!(remove_dot_segments("/a/b/c/./../../g"), "/a/g");
        assert_eq!(remove_dot_segments("mid/content=5/../6"), "mid/6");
        assert_eq!(remove_dot_segments("/../a"), "/a");
        assert_eq!(remove_dot_segments("/a/.."), "/");
        assert_eq!(remove_dot_segments("/a/./"), "/a/");
        assert_eq!(remove_dot_segments("/a//b"), "/a//b");
    }

    #[test]
    fn target_is_normalised_then_decoded() {
        let (path, query) = parse_target("/a/./b/../c%20d?q=fish%20%26%20chips&flag&&x=").unwrap();
        assert_eq!(path, "/a/c d");
        assert_eq!(
            query,
            vec![QueryItem::new("q", "fish & chips"), QueryItem::new("flag", ""), QueryItem::new("x", "")]
        );
    }

    #[test]
    fn encoded_dots_and_slashes_stay_inside_their_segment() {
        assert_eq!(parse_target("/a/%2e%2e/b").unwrap().0, "/a/../b");
        assert_eq!(parse_target("/a/%2E/b").unwrap().0, "/a/./b");
        assert_eq!(parse_target("/a%2F..%2Fb/../c").unwrap().0, "/c");
        assert_eq!(parse_target("/files/a%2Fb").unwrap().0, "/files/a/b");
    }

    #[test]
    fn absolute_form_keeps_only_the_path() {
        assert_eq!(parse_target("http://example.com/x/../y").unwrap().0, "/y");
        assert_eq!(parse_target("https://example.com").unwrap().0, "/");
        assert_eq!(parse_target("*").unwrap().0, "*");
    }

    #[test]
    fn relative_targets_are_rejected() {
        assert!(matches!(parse_target("index.html"), Err(ParseError::InvalidUri)));
        assert!(matches!(parse_target("/%FF"), Err(ParseError::InvalidUri)));
    }

    #[test]
    fn encoding_escapes_reserved_bytes() {
        let query = [QueryItem::new("q", "fish & chips"), QueryItem::new("a=b", "")];
        assert_eq!(encode_target("/menu items", &query), "/menu%20items?q=fish%20%26%20chips&a%3Db=");
        assert_eq!(encode_target("", &[]), "/");

        let (path, decoded) = parse_target(&encode_target("/menu items", &query)).unwrap();
        assert_eq!(path, "/menu items");
        assert_eq!(decoded, query);
    }
}
