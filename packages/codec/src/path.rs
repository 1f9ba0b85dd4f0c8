//! Path expressions and resolved locations.
//!
//! A field's storage path is a restricted JSONPath: a `$` root followed by
//! member access (`.name`, `['name']`), array indexing (`[0]`), and wildcard
//! fan-out (`[*]`, `.*`). Expressions are parsed once into segments and
//! interpreted against a [`Value`] tree.
//!
//! Resolution yields [`Location`]s rather than references: a location is the
//! chain of keys and indices from the root, so a caller can read the matched
//! value, overwrite it, or remove it from its parent after the walk is done.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Errors related to path expression parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The expression is empty.
    Empty,
    /// The expression is not in the supported subset.
    InvalidSyntax {
        expression: String,
        position: usize,
        message: String,
    },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "invalid path: empty expression"),
            PathError::InvalidSyntax {
                expression,
                position,
                message,
            } => write!(
                f,
                "invalid path '{}' at position {}: {}",
                expression, position, message
            ),
        }
    }
}

impl std::error::Error for PathError {}

/// One parsed segment of a path expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Member of an object.
    Field(String),
    /// Element of an array.
    Index(usize),
    /// Every element of an array or every value of an object.
    Wildcard,
}

/// A parsed path expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    expression: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse an expression such as `$.address.city` or `$.tags[*]`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use docmap_codec::JsonPath;
    ///
    /// let path = JsonPath::parse("$.owner['first name']").unwrap();
    /// assert_eq!(path.segments().len(), 2);
    /// assert!(JsonPath::parse("$..deep").is_err());
    /// ```
    pub fn parse(expression: &str) -> Result<Self, PathError> {
        if expression.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = Parser::new(expression).parse()?;
        Ok(Self {
            expression: expression.to_string(),
            segments,
        })
    }

    /// The default path for a field: its direct child `$.<name>`.
    pub fn field(name: &str) -> Self {
        Self {
            expression: format!("${}", member_expression(name)),
            segments: vec![Segment::Field(name.to_string())],
        }
    }

    /// The elements of a direct child array: `$.<name>[*]`.
    pub fn field_elements(name: &str) -> Self {
        Self {
            expression: format!("${}[*]", member_expression(name)),
            segments: vec![Segment::Field(name.to_string()), Segment::Wildcard],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve against a tree, returning every matching location in
    /// document order. The root itself is never a match.
    pub fn resolve(&self, root: &Value) -> Vec<Location> {
        if self.segments.is_empty() {
            return Vec::new();
        }

        let mut frontier = vec![Location::root()];
        for segment in &self.segments {
            let mut next = Vec::new();
            for location in frontier {
                let Some(node) = root.get(&location) else {
                    continue;
                };
                match (segment, node) {
                    (Segment::Field(name), Value::Map(map)) if map.contains_key(name) => {
                        next.push(location.child(Step::Key(name.clone())));
                    }
                    (Segment::Index(index), Value::Array(arr)) if *index < arr.len() => {
                        next.push(location.child(Step::Index(*index)));
                    }
                    (Segment::Wildcard, Value::Array(arr)) => {
                        next.extend((0..arr.len()).map(|i| location.child(Step::Index(i))));
                    }
                    (Segment::Wildcard, Value::Map(map)) => {
                        next.extend(map.keys().map(|k| location.child(Step::Key(k.clone()))));
                    }
                    _ => {}
                }
            }
            frontier = next;
        }
        frontier
    }
}

fn member_expression(name: &str) -> String {
    let simple = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if simple {
        format!(".{}", name)
    } else {
        format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        JsonPath::parse(&s)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.expression
    }
}

impl std::str::FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

struct Parser<'a> {
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            chars: expression.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> PathError {
        PathError::InvalidSyntax {
            expression: self.expression.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Result<(), PathError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{}', found '{}'", expected, c)))
            }
            None => Err(self.error(format!("expected '{}', found end of path", expected))),
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, PathError> {
        self.expect('$')?;
        let mut segments = Vec::new();
        while let Some(c) = self.bump() {
            let segment = match c {
                '.' => self.dot_member()?,
                '[' => self.bracket_member()?,
                other => {
                    self.pos -= 1;
                    return Err(self.error(format!("unexpected character '{}'", other)));
                }
            };
            segments.push(segment);
        }
        Ok(segments)
    }

    fn dot_member(&mut self) -> Result<Segment, PathError> {
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                Ok(Segment::Wildcard)
            }
            Some('.') => Err(self.error("recursive descent is not supported")),
            _ => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == '.' || c == '[' {
                        break;
                    }
                    self.pos += 1;
                }
                if start == self.pos {
                    return Err(self.error("expected a member name"));
                }
                Ok(Segment::Field(self.chars[start..self.pos].iter().collect()))
            }
        }
    }

    fn bracket_member(&mut self) -> Result<Segment, PathError> {
        let segment = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                Segment::Field(self.quoted(quote)?)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| self.error(format!("invalid array index: {}", e)))?;
                Segment::Index(index)
            }
            Some(c) => return Err(self.error(format!("unsupported selector '{}'", c))),
            None => return Err(self.error("unterminated selector")),
        };
        self.expect(']')?;
        Ok(segment)
    }

    fn quoted(&mut self, quote: char) -> Result<String, PathError> {
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(escaped) => name.push(escaped),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(name),
                Some(c) => name.push(c),
                None => return Err(self.error("unterminated quoted name")),
            }
        }
    }
}

/// One step from a container to a child.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl Step {
    pub fn key(key: impl Into<String>) -> Self {
        Step::Key(key.into())
    }
}

/// A concrete, writable position inside a tree.
///
/// The last step is the key (or index) within the immediate parent.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    steps: Vec<Step>,
}

impl Location {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// Extend by one step.
    #[must_use]
    pub fn child(&self, step: Step) -> Location {
        let mut steps = self.steps.clone();
        steps.push(step);
        Location { steps }
    }

    /// The step within the parent, and the parent's location.
    pub fn split_last(&self) -> Option<(&Step, Location)> {
        let (last, rest) = self.steps.split_last()?;
        Some((
            last,
            Location {
                steps: rest.to_vec(),
            },
        ))
    }

    /// The parent's location, if this is not the root.
    pub fn parent(&self) -> Option<Location> {
        self.split_last().map(|(_, parent)| parent)
    }
}

impl From<Vec<Step>> for Location {
    fn from(steps: Vec<Step>) -> Self {
        Location { steps }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for step in &self.steps {
            match step {
                Step::Key(key) => f.write_str(&member_expression(key))?,
                Step::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        Value::from_json(json!({
            "name": "Alice",
            "tags": ["a", "b", "c"],
            "address": { "city": "Cleveland", "zip": "44101" },
            "people": [ { "name": "x" }, { "name": "y" }, { "age": 3 } ],
        }))
    }

    #[test]
    fn parse_supported_forms() {
        let path = JsonPath::parse("$.people[0]['name']").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Field("people".into()),
                Segment::Index(0),
                Segment::Field("name".into()),
            ]
        );
        assert_eq!(
            JsonPath::parse("$.tags[*]").unwrap().segments(),
            &[Segment::Field("tags".into()), Segment::Wildcard]
        );
        assert_eq!(
            JsonPath::parse("$.address.*").unwrap().segments(),
            &[Segment::Field("address".into()), Segment::Wildcard]
        );
        assert_eq!(
            JsonPath::parse(r#"$["it's"]"#).unwrap().segments(),
            &[Segment::Field("it's".into())]
        );
    }

    #[test]
    fn parse_rejects_unsupported_forms() {
        assert_eq!(JsonPath::parse(""), Err(PathError::Empty));
        assert!(JsonPath::parse("name").is_err());
        assert!(JsonPath::parse("$..name").is_err());
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("$[?(@.a)]").is_err());
        assert!(JsonPath::parse("$['open").is_err());
        assert!(JsonPath::parse("$[1").is_err());
    }

    #[test]
    fn default_paths() {
        assert_eq!(JsonPath::field("name").as_str(), "$.name");
        assert_eq!(JsonPath::field_elements("tags").as_str(), "$.tags[*]");
        assert_eq!(JsonPath::field("first name").as_str(), "$['first name']");
    }

    #[test]
    fn resolve_direct_member() {
        let found = JsonPath::field("name").resolve(&tree());
        assert_eq!(found, vec![Location::from(vec![Step::key("name")])]);
        assert!(JsonPath::field("missing").resolve(&tree()).is_empty());
    }

    #[test]
    fn resolve_fans_out_over_arrays() {
        let found = JsonPath::field_elements("tags").resolve(&tree());
        assert_eq!(found.len(), 3);
        assert_eq!(found[2].to_string(), "$.tags[2]");
    }

    #[test]
    fn resolve_skips_elements_without_the_member() {
        let found = JsonPath::parse("$.people[*].name").unwrap().resolve(&tree());
        let rendered: Vec<String> = found.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["$.people[0].name", "$.people[1].name"]);
    }

    #[test]
    fn resolve_through_scalars_is_empty() {
        assert!(JsonPath::parse("$.name.first").unwrap().resolve(&tree()).is_empty());
        assert!(JsonPath::parse("$.tags[9]").unwrap().resolve(&tree()).is_empty());
    }

    #[test]
    fn root_is_never_a_match() {
        assert!(JsonPath::parse("$").unwrap().resolve(&tree()).is_empty());
    }

    #[test]
    fn deserializes_from_string() {
        let path: JsonPath = serde_json::from_value(json!("$.a.b")).unwrap();
        assert_eq!(path.segments().len(), 2);
        assert!(serde_json::from_value::<JsonPath>(json!("a.b")).is_err());
    }
}
