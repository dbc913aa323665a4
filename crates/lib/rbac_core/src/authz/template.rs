//! Path templates: route patterns with single-segment placeholders.
//!
//! A segment written as `{name}` matches exactly one non-empty path segment;
//! every other segment must match literally. Matching is anchored at both
//! ends, so `/users/{id}` matches `/users/42` but neither `/users` nor
//! `/users/42/edit`.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Compile a template. Any string is a valid template; segments that are
    /// not exactly one brace-delimited token are literal.
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| match placeholder_name(segment) {
                Some(name) => Segment::Placeholder(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();
        Self {
            raw: template.to_string(),
            segments,
        }
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the placeholders, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether `path` matches the whole template.
    pub fn matches(&self, path: &str) -> bool {
        let mut actual = path.split('/');
        for expected in &self.segments {
            let Some(segment) = actual.next() else {
                return false;
            };
            let ok = match expected {
                Segment::Literal(lit) => lit == segment,
                Segment::Placeholder(_) => !segment.is_empty(),
            };
            if !ok {
                return false;
            }
        }
        actual.next().is_none()
    }
}

fn placeholder_name(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix('{')?.strip_suffix('}')?;
    if name.is_empty() || name.contains(['{', '}']) {
        return None;
    }
    Some(name)
}
