//! Tag expressions for selecting objects and tags
//!
//! An object filter is a list of comparisons joined by `and` / `or`
//! (also `&&`, `||`, `AND`, `OR`), with `and` binding tighter and space
//! padded brackets for grouping:
//!
//! ```text
//! place=city or ( place=town and population>=10000 )
//! amenity=restaurant =pub =bar        # same key, any of three values
//! all highway= lit=yes                # "all": adjacent terms are and-ed
//! ```
//!
//! Comparisons are `=`, `!=`, `<`, `<=`, `>`, `>=`. A value starting with a
//! digit is compared numerically, anything else byte-wise. A key without a
//! value, or with an empty one, accepts any value. Keys and `=`/`!=` values
//! may carry a `*` wildcard at the start, the end, or both. `@id`, `@uid`
//! and `@user` stand for the object id and its author. A backslash makes
//! the next character literal, so `name=Rue\ Haute` holds a space.
//!
//! A tag filter is a plain list of comparisons without operators or
//! brackets.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use butterfly_common::{Error, Result};
use butterfly_io::Object;

/// Text matcher with optional leading and trailing wildcards
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Any,
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl Pattern {
    fn parse(raw: &str) -> Pattern {
        let leading = raw.starts_with('*');
        let trailing = raw.len() > 1 && raw.ends_with('*') && !raw.ends_with("\\*");
        let start = usize::from(leading);
        let end = raw.len() - usize::from(trailing);
        if start >= end {
            return if leading { Pattern::Any } else { Pattern::Exact(String::new()) };
        }
        let inner = unescape(&raw[start..end]);
        match (leading, trailing) {
            (false, false) => Pattern::Exact(inner),
            (false, true) => Pattern::Prefix(inner),
            (true, false) => Pattern::Suffix(inner),
            (true, true) => Pattern::Contains(inner),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(s) => text == s,
            Pattern::Prefix(s) => text.starts_with(s.as_str()),
            Pattern::Suffix(s) => text.ends_with(s.as_str()),
            Pattern::Contains(s) => text.contains(s.as_str()),
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Order {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Order::Less => ordering.is_lt(),
            Order::LessEqual => ordering.is_le(),
            Order::Greater => ordering.is_gt(),
            Order::GreaterEqual => ordering.is_ge(),
        }
    }
}

/// What a tag value has to satisfy
#[derive(Debug, Clone, PartialEq)]
enum ValueTest {
    Any,
    Matches(Pattern),
    Differs(Pattern),
    Text(Order, String),
    Number(Order, f64),
}

impl ValueTest {
    fn accepts(&self, value: &str) -> bool {
        match self {
            ValueTest::Any => true,
            ValueTest::Matches(p) => p.matches(value),
            ValueTest::Differs(p) => !p.matches(value),
            ValueTest::Text(order, bound) => order.holds(value.cmp(bound.as_str())),
            ValueTest::Number(order, bound) => value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|v| v.partial_cmp(bound))
                .is_some_and(|o| order.holds(o)),
        }
    }
}

/// Object header fields usable as keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Uid,
    User,
}

#[derive(Debug, Clone, PartialEq)]
enum Subject {
    Tag(Pattern),
    Field(Field),
}

/// One `key OP value` term
#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    subject: Subject,
    test: ValueTest,
}

impl Comparison {
    fn holds(&self, object: &Object) -> bool {
        match &self.subject {
            Subject::Tag(key) => object
                .tags
                .iter()
                .any(|(k, v)| key.matches(k) && self.test.accepts(v)),
            Subject::Field(Field::Id) => self.test.accepts(&object.id.to_string()),
            Subject::Field(Field::Uid) => self.test.accepts(&object.author.uid.to_string()),
            Subject::Field(Field::User) => self.test.accepts(&object.author.user),
        }
    }

    fn accepts_tag(&self, key: &str, value: &str) -> bool {
        self.key_matches(key) && self.test.accepts(value)
    }

    fn key_matches(&self, key: &str) -> bool {
        match &self.subject {
            Subject::Tag(pattern) => pattern.matches(key),
            Subject::Field(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And,
    Or,
    Open,
    Close,
    Term(Comparison),
}

fn invalid(text: &str, message: impl fmt::Display) -> Error {
    Error::InvalidArguments(format!("filter \"{text}\": {message}"))
}

/// Split on unescaped whitespace
fn words(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() && !escaped {
            if let Some(s) = start.take() {
                out.push(&text[s..i]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
        escaped = c == '\\' && !escaped;
    }
    if let Some(s) = start {
        out.push(&text[s..]);
    }
    out
}

/// Byte position and length of the first unescaped comparison operator
fn find_operator(word: &str) -> Option<(usize, &'static str)> {
    let bytes = word.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'!' if bytes.get(i + 1) == Some(&b'=') => return Some((i, "!=")),
            b'<' | b'>' if bytes.get(i + 1) == Some(&b'=') => {
                return Some((i, if bytes[i] == b'<' { "<=" } else { ">=" }))
            }
            b'<' => return Some((i, "<")),
            b'>' => return Some((i, ">")),
            b'=' => return Some((i, "=")),
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_subject(key: &str) -> Subject {
    match key {
        "@id" => Subject::Field(Field::Id),
        "@uid" => Subject::Field(Field::Uid),
        "@user" => Subject::Field(Field::User),
        _ => Subject::Tag(Pattern::parse(key)),
    }
}

fn parse_test(text: &str, op: &str, value: &str) -> Result<ValueTest> {
    let ordered = |order| {
        let bound = unescape(value);
        let numeric = bound.starts_with(|c: char| c.is_ascii_digit());
        match bound.parse::<f64>() {
            Ok(n) if numeric => ValueTest::Number(order, n),
            _ => ValueTest::Text(order, bound),
        }
    };
    Ok(match op {
        "=" if value.is_empty() => ValueTest::Any,
        "=" => match Pattern::parse(value) {
            Pattern::Any => ValueTest::Any,
            pattern => ValueTest::Matches(pattern),
        },
        _ if value.is_empty() => return Err(invalid(text, format!("'{op}' without a value"))),
        "!=" => ValueTest::Differs(Pattern::parse(value)),
        "<" => ordered(Order::Less),
        "<=" => ordered(Order::LessEqual),
        ">" => ordered(Order::Greater),
        _ => ordered(Order::GreaterEqual),
    })
}

/// Comparisons and operators of `text`, with the leading `all` removed.
/// A term without a key takes the key of the term before it.
fn tokenize(text: &str) -> Result<(bool, Vec<Token>)> {
    let mut words = words(text);
    let meet_all = matches!(words.first(), Some(&"all") | Some(&"and")) && words.len() > 1;
    if meet_all {
        words.remove(0);
    }
    let mut tokens = Vec::with_capacity(words.len());
    let mut last_key: Option<Subject> = None;
    for word in words {
        let token = match word {
            "and" | "AND" | "&&" => Token::And,
            "or" | "OR" | "||" => Token::Or,
            "(" => Token::Open,
            ")" => Token::Close,
            _ => {
                let (key, op, value) = match find_operator(word) {
                    Some((at, op)) => (&word[..at], op, &word[at + op.len()..]),
                    None => (word, "=", ""),
                };
                let subject = if key.is_empty() {
                    last_key
                        .clone()
                        .ok_or_else(|| invalid(text, format!("'{word}' has no key")))?
                } else {
                    parse_subject(key)
                };
                last_key = Some(subject.clone());
                Token::Term(Comparison {
                    subject,
                    test: parse_test(text, op, value)?,
                })
            }
        };
        tokens.push(token);
    }
    if tokens.is_empty() {
        return Err(invalid(text, "empty"));
    }
    Ok((meet_all, tokens))
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Test(Comparison),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

impl Expr {
    fn holds(&self, object: &Object) -> bool {
        match self {
            Expr::Test(c) => c.holds(object),
            Expr::All(parts) => parts.iter().all(|e| e.holds(object)),
            Expr::Any(parts) => parts.iter().any(|e| e.holds(object)),
        }
    }
}

/// Recursive descent over the token list
struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn any(&mut self) -> Result<Expr> {
        let mut parts = vec![self.all()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.all()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Any(parts) })
    }

    fn all(&mut self) -> Result<Expr> {
        let mut parts = vec![self.operand()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            parts.push(self.operand()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::All(parts) })
    }

    fn operand(&mut self) -> Result<Expr> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Term(c)) => Ok(Expr::Test(c)),
            Some(Token::Open) => {
                let inner = self.any()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(invalid(self.text, "unbalanced bracket"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(other) => Err(invalid(self.text, format!("unexpected {other:?}"))),
            None => Err(invalid(self.text, "ends with an operator")),
        }
    }
}

/// Boolean expression over the tags and header of an object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFilter {
    expr: Expr,
}

impl ObjectFilter {
    pub fn matches(&self, object: &Object) -> bool {
        self.expr.holds(object)
    }

    /// Accept what either filter accepts
    pub fn or(self, other: ObjectFilter) -> ObjectFilter {
        let mut parts = match self.expr {
            Expr::Any(parts) => parts,
            expr => vec![expr],
        };
        parts.push(other.expr);
        ObjectFilter {
            expr: Expr::Any(parts),
        }
    }
}

impl FromStr for ObjectFilter {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let (meet_all, tokens) = tokenize(text)?;
        let implied = if meet_all { Token::And } else { Token::Or };
        // juxtaposed operands are joined by the implied operator
        let mut joined = Vec::with_capacity(tokens.len() * 2);
        for token in tokens {
            let starts_operand = matches!(token, Token::Term(_) | Token::Open);
            let ends_operand = matches!(joined.last(), Some(Token::Term(_) | Token::Close));
            if starts_operand && ends_operand {
                joined.push(implied.clone());
            }
            joined.push(token);
        }
        let mut parser = Parser {
            text,
            tokens: joined,
            pos: 0,
        };
        let expr = parser.any()?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid(text, "unbalanced bracket"));
        }
        Ok(ObjectFilter { expr })
    }
}

/// Which tags an object keeps: a list of key/value comparisons
#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    /// Tags not named by any comparison are removed too
    meet_all: bool,
    rules: Vec<Comparison>,
}

impl TagFilter {
    /// As a keep list: a tag stays when a rule accepts it, or when no rule
    /// names its key and the list is not an `all` list
    pub fn keeps(&self, key: &str, value: &str) -> bool {
        if self.rules.iter().any(|r| r.accepts_tag(key, value)) {
            return true;
        }
        !self.meet_all && !self.rules.iter().any(|r| r.key_matches(key))
    }

    /// As a drop list: a tag goes when a rule accepts it
    pub fn drops(&self, key: &str, value: &str) -> bool {
        self.rules.iter().any(|r| r.accepts_tag(key, value))
    }

    pub fn merge(mut self, other: TagFilter) -> TagFilter {
        self.meet_all |= other.meet_all;
        self.rules.extend(other.rules);
        self
    }
}

impl FromStr for TagFilter {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let (meet_all, tokens) = tokenize(text)?;
        let rules = tokens
            .into_iter()
            .map(|token| match token {
                Token::Term(c) if matches!(c.subject, Subject::Tag(_)) => Ok(c),
                Token::Term(_) => Err(invalid(text, "tag filters only compare tags")),
                _ => Err(invalid(text, "tag filters take no operators or brackets")),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TagFilter { meet_all, rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::{Author, Coord};

    fn tagged(tags: &[(&str, &str)]) -> Object {
        tags.iter()
            .fold(Object::node(7, Coord::new(0, 0)), |o, &(k, v)| o.with_tag(k, v))
    }

    fn filter(text: &str) -> ObjectFilter {
        text.parse().unwrap()
    }

    #[test]
    fn same_key_alternatives() {
        let f = filter("amenity=restaurant =pub =bar");
        assert!(f.matches(&tagged(&[("amenity", "pub")])));
        assert!(!f.matches(&tagged(&[("amenity", "cafe")])));
        assert!(!f.matches(&tagged(&[("shop", "pub")])));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let f = filter("place=city or place=town and population>=10000");
        assert!(f.matches(&tagged(&[("place", "city")])));
        assert!(f.matches(&tagged(&[("place", "town"), ("population", "25000")])));
        assert!(!f.matches(&tagged(&[("place", "town"), ("population", "900")])));

        let f = filter("( place=city or place=town ) and population>=10000");
        assert!(!f.matches(&tagged(&[("place", "city")])));
        assert!(f.matches(&tagged(&[("place", "city"), ("population", "2e6")])));
    }

    #[test]
    fn all_prefix_joins_with_and() {
        let f = filter("all highway= lit=yes");
        assert!(f.matches(&tagged(&[("highway", "path"), ("lit", "yes")])));
        assert!(!f.matches(&tagged(&[("highway", "path")])));
        let f = filter("highway= lit=yes");
        assert!(f.matches(&tagged(&[("highway", "path")])));
    }

    #[test]
    fn wildcards_and_inequality() {
        let f = filter("highway=*ary");
        assert!(f.matches(&tagged(&[("highway", "primary")])));
        assert!(!f.matches(&tagged(&[("highway", "primary_link")])));
        assert!(filter("wikipedia:*=").matches(&tagged(&[("wikipedia:de", "Brüssel")])));
        assert!(filter("ref_name=*central*").matches(&tagged(&[("ref_name", "x central y")])));
        let f = filter("access!=private");
        assert!(f.matches(&tagged(&[("access", "yes")])));
        assert!(!f.matches(&tagged(&[("access", "private")])));
        assert!(!f.matches(&tagged(&[])));
    }

    #[test]
    fn numeric_only_when_the_bound_starts_with_a_digit() {
        assert!(filter("layer>=2").matches(&tagged(&[("layer", "10")])));
        assert!(!filter("layer>=2").matches(&tagged(&[("layer", "high")])));
        // byte-wise: "b" < "c"
        assert!(filter("name<c").matches(&tagged(&[("name", "bakery")])));
        assert!(!filter("name<c").matches(&tagged(&[("name", "dairy")])));
    }

    #[test]
    fn header_fields() {
        let mut object = tagged(&[]);
        object.author = Author {
            uid: 42,
            user: "Jo Mapper".into(),
            ..Author::default()
        };
        assert!(filter("@id=7").matches(&object));
        assert!(filter("@uid>40").matches(&object));
        assert!(filter("@user=Jo\\ Mapper").matches(&object));
        assert!(!filter("@user=Jo").matches(&object));
    }

    #[test]
    fn malformed_filters_are_invalid_arguments() {
        for text in ["", "( a=b", "a=b )", "a=b or", "=pub", "a<", "and or"] {
            let err = text.parse::<ObjectFilter>().err().unwrap();
            assert!(matches!(err, Error::InvalidArguments(_)), "{text:?}");
        }
    }

    #[test]
    fn combined_filters_accept_either() {
        let f = filter("amenity=pub").or(filter("shop=bakery"));
        assert!(f.matches(&tagged(&[("shop", "bakery")])));
        assert!(f.matches(&tagged(&[("amenity", "pub")])));
        assert!(!f.matches(&tagged(&[("shop", "butcher")])));
    }

    #[test]
    fn tag_lists() {
        let keep: TagFilter = "highway=motorway =primary".parse().unwrap();
        assert!(keep.keeps("highway", "primary"));
        assert!(!keep.keeps("highway", "track"));
        assert!(keep.keeps("name", "A1"));

        let keep: TagFilter = "all highway= name=".parse().unwrap();
        assert!(keep.keeps("highway", "track"));
        assert!(!keep.keeps("surface", "gravel"));

        let drop: TagFilter = "note= fixme=*".parse().unwrap();
        assert!(drop.drops("note", "x"));
        assert!(!drop.drops("name", "x"));

        assert!("a=b and c=d".parse::<TagFilter>().is_err());
        assert!("@id=1".parse::<TagFilter>().is_err());
    }
}
