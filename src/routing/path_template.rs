//! Path templates (`/blog/:slug`, `/:path*`, `{/:lang}?`, `/:id(\\d+)`).
//!
//! Three separable phases: [`lex`] turns the template into lexical tokens,
//! [`parse`] builds the token list (literals and keys), and the compilers turn
//! that into a matching regex ([`PathMatcher`]) or a string renderer
//! ([`PathRenderer`]). Both rewrite sources and rewrite destinations go through here.

use std::collections::BTreeMap;

use fancy_regex::Regex;
use thiserror::Error;

use crate::http::event::MultiValue;

const DEFAULT_DELIMITER: &str = "/#?";
const PREFIXES: &str = "./";

pub type Params = BTreeMap<String, MultiValue>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("missing parameter name at {0}")]
    MissingParameterName(usize),
    #[error("pattern cannot start with \"?\" at {0}")]
    PatternStartsWithQuestion(usize),
    #[error("capturing groups are not allowed at {0}")]
    CapturingGroup(usize),
    #[error("unbalanced pattern at {0}")]
    UnbalancedPattern(usize),
    #[error("missing pattern at {0}")]
    MissingPattern(usize),
    #[error("unexpected {found:?} at {index}, expected {expected:?}")]
    Unexpected {
        found: LexKind,
        index: usize,
        expected: LexKind,
    },
    #[error("invalid regex {0:?}: {1}")]
    Regex(String, String),
    #[error("expected {0:?} to not repeat, but got an array")]
    UnexpectedRepeat(String),
    #[error("expected {0:?} to not be empty")]
    Empty(String),
    #[error("expected {name:?} to be {expected}")]
    MissingValue { name: String, expected: &'static str },
    #[error("expected all {name:?} to match {pattern:?}, but got {value:?}")]
    Invalid {
        name: String,
        pattern: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexKind {
    Open,
    Close,
    Pattern,
    Name,
    Char,
    EscapedChar,
    Modifier,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexToken {
    pub kind: LexKind,
    pub index: usize,
    pub value: String,
}

impl LexToken {
    fn new(kind: LexKind, index: usize, value: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            value: value.into(),
        }
    }
}

pub fn lex(input: &str) -> Result<Vec<LexToken>, TemplateError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' | '+' | '?' => {
                tokens.push(LexToken::new(LexKind::Modifier, i, c));
                i += 1;
            }
            '\\' => {
                let escaped = chars.get(i + 1).map(|c| c.to_string()).unwrap_or_default();
                tokens.push(LexToken::new(LexKind::EscapedChar, i, escaped));
                i += 2;
            }
            '{' => {
                tokens.push(LexToken::new(LexKind::Open, i, c));
                i += 1;
            }
            '}' => {
                tokens.push(LexToken::new(LexKind::Close, i, c));
                i += 1;
            }
            ':' => {
                let mut j = i + 1;
                let mut name = String::new();
                while let Some(&ch) = chars.get(j) {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        j += 1;
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(TemplateError::MissingParameterName(i));
                }
                tokens.push(LexToken::new(LexKind::Name, i, name));
                i = j;
            }
            '(' => {
                let mut count = 1;
                let mut pattern = String::new();
                let mut j = i + 1;

                if chars.get(j) == Some(&'?') {
                    return Err(TemplateError::PatternStartsWithQuestion(j));
                }

                while j < chars.len() {
                    if chars[j] == '\\' {
                        pattern.push(chars[j]);
                        if let Some(&next) = chars.get(j + 1) {
                            pattern.push(next);
                        }
                        j += 2;
                        continue;
                    }
                    if chars[j] == ')' {
                        count -= 1;
                        if count == 0 {
                            j += 1;
                            break;
                        }
                    } else if chars[j] == '(' {
                        count += 1;
                        if chars.get(j + 1) != Some(&'?') {
                            return Err(TemplateError::CapturingGroup(j));
                        }
                    }
                    pattern.push(chars[j]);
                    j += 1;
                }

                if count != 0 {
                    return Err(TemplateError::UnbalancedPattern(i));
                }
                if pattern.is_empty() {
                    return Err(TemplateError::MissingPattern(i));
                }
                tokens.push(LexToken::new(LexKind::Pattern, i, pattern));
                i = j;
            }
            _ => {
                tokens.push(LexToken::new(LexKind::Char, i, c));
                i += 1;
            }
        }
    }

    tokens.push(LexToken::new(LexKind::End, i, ""));
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    None,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Modifier {
    fn from_token(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("?") => Self::Optional,
            Some("*") => Self::ZeroOrMore,
            Some("+") => Self::OneOrMore,
            _ => Self::None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Optional => "?",
            Self::ZeroOrMore => "*",
            Self::OneOrMore => "+",
        }
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, Self::ZeroOrMore | Self::OneOrMore)
    }

    pub fn is_optional(self) -> bool {
        matches!(self, Self::Optional | Self::ZeroOrMore)
    }
}

/// A parameter slot. Unnamed groups get their position as name (`"0"`, `"1"`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub name: String,
    pub prefix: String,
    pub suffix: String,
    pub pattern: String,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Key(Key),
}

struct Parser {
    tokens: Vec<LexToken>,
    pos: usize,
}

impl Parser {
    fn try_consume(&mut self, kind: LexKind) -> Option<String> {
        match self.tokens.get(self.pos) {
            Some(token) if token.kind == kind => {
                self.pos += 1;
                Some(token.value.clone())
            }
            _ => None,
        }
    }

    fn must_consume(&mut self, kind: LexKind) -> Result<String, TemplateError> {
        if let Some(value) = self.try_consume(kind) {
            return Ok(value);
        }
        let (found, index) = self
            .tokens
            .get(self.pos)
            .map(|t| (t.kind, t.index))
            .unwrap_or((LexKind::End, 0));
        Err(TemplateError::Unexpected {
            found,
            index,
            expected: kind,
        })
    }

    fn consume_text(&mut self) -> String {
        let mut result = String::new();
        while let Some(value) = self
            .try_consume(LexKind::Char)
            .or_else(|| self.try_consume(LexKind::EscapedChar))
        {
            result.push_str(&value);
        }
        result
    }
}

pub fn parse(input: &str) -> Result<Vec<Token>, TemplateError> {
    let default_pattern = format!("[^{}]+?", regex::escape(DEFAULT_DELIMITER));
    let mut parser = Parser {
        tokens: lex(input)?,
        pos: 0,
    };
    let mut result = Vec::new();
    let mut key_index = 0usize;
    let mut path = String::new();
    let mut next_index = || {
        let name = key_index.to_string();
        key_index += 1;
        name
    };

    while parser.pos < parser.tokens.len() {
        let ch = parser.try_consume(LexKind::Char);
        let name = parser.try_consume(LexKind::Name);
        let pattern = parser.try_consume(LexKind::Pattern);

        if name.is_some() || pattern.is_some() {
            let mut prefix = ch.unwrap_or_default();
            if !prefix.is_empty() && !PREFIXES.contains(prefix.as_str()) {
                path.push_str(&prefix);
                prefix.clear();
            }
            if !path.is_empty() {
                result.push(Token::Literal(std::mem::take(&mut path)));
            }
            result.push(Token::Key(Key {
                name: name.unwrap_or_else(&mut next_index),
                prefix,
                suffix: String::new(),
                pattern: pattern.unwrap_or_else(|| default_pattern.clone()),
                modifier: Modifier::from_token(parser.try_consume(LexKind::Modifier)),
            }));
            continue;
        }

        if let Some(value) = ch.or_else(|| parser.try_consume(LexKind::EscapedChar)) {
            path.push_str(&value);
            continue;
        }

        if !path.is_empty() {
            result.push(Token::Literal(std::mem::take(&mut path)));
        }

        if parser.try_consume(LexKind::Open).is_some() {
            let prefix = parser.consume_text();
            let name = parser.try_consume(LexKind::Name).unwrap_or_default();
            let pattern = parser.try_consume(LexKind::Pattern).unwrap_or_default();
            let suffix = parser.consume_text();
            parser.must_consume(LexKind::Close)?;

            let key_name = if !name.is_empty() {
                name.clone()
            } else if !pattern.is_empty() {
                next_index()
            } else {
                String::new()
            };
            let key_pattern = if !name.is_empty() && pattern.is_empty() {
                default_pattern.clone()
            } else {
                pattern
            };
            result.push(Token::Key(Key {
                name: key_name,
                prefix,
                suffix,
                pattern: key_pattern,
                modifier: Modifier::from_token(parser.try_consume(LexKind::Modifier)),
            }));
            continue;
        }

        parser.must_consume(LexKind::End)?;
    }

    Ok(result)
}

#[derive(Debug, Clone)]
pub struct RegexOptions {
    pub sensitive: bool,
    pub strict: bool,
    pub start: bool,
    pub end: bool,
    /// Characters that may follow the match when `end` is set.
    pub ends_with: String,
    pub delimiter: String,
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            sensitive: false,
            strict: false,
            start: true,
            end: true,
            ends_with: String::new(),
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

fn compile(pattern: &str, sensitive: bool) -> Result<Regex, TemplateError> {
    let source = if sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&source).map_err(|e| TemplateError::Regex(pattern.to_string(), e.to_string()))
}

/// Build the regex source for a token list.
pub fn tokens_to_regex_source(tokens: &[Token], options: &RegexOptions) -> String {
    let ends_with = format!("[{}]|$", regex::escape(&options.ends_with));
    let delimiter = format!("[{}]", regex::escape(&options.delimiter));
    let mut route = if options.start { "^".to_string() } else { String::new() };

    for token in tokens {
        match token {
            Token::Literal(text) => route.push_str(&regex::escape(text)),
            Token::Key(key) => {
                let prefix = regex::escape(&key.prefix);
                let suffix = regex::escape(&key.suffix);
                let pattern = &key.pattern;
                if pattern.is_empty() {
                    route.push_str(&format!("(?:{prefix}{suffix}){}", key.modifier.as_str()));
                } else if !prefix.is_empty() || !suffix.is_empty() {
                    if key.modifier.is_repeat() {
                        let optional = if key.modifier == Modifier::ZeroOrMore { "?" } else { "" };
                        route.push_str(&format!(
                            "(?:{prefix}((?:{pattern})(?:{suffix}{prefix}(?:{pattern}))*){suffix}){optional}"
                        ));
                    } else {
                        route.push_str(&format!(
                            "(?:{prefix}({pattern}){suffix}){}",
                            key.modifier.as_str()
                        ));
                    }
                } else if key.modifier.is_repeat() {
                    route.push_str(&format!("((?:{pattern}){})", key.modifier.as_str()));
                } else {
                    route.push_str(&format!("({pattern}){}", key.modifier.as_str()));
                }
            }
        }
    }

    if options.end {
        if !options.strict {
            route.push_str(&format!("{delimiter}?"));
        }
        if options.ends_with.is_empty() {
            route.push('$');
        } else {
            route.push_str(&format!("(?={ends_with})"));
        }
    } else {
        let end_delimited = match tokens.last() {
            None => true,
            Some(Token::Literal(text)) => text
                .chars()
                .last()
                .map(|c| options.delimiter.contains(c))
                .unwrap_or(false),
            Some(Token::Key(_)) => false,
        };
        if !options.strict {
            route.push_str(&format!("(?:{delimiter}(?={ends_with}))?"));
        }
        if !end_delimited {
            route.push_str(&format!("(?={delimiter}|{ends_with})"));
        }
    }

    route
}

fn keys_of(tokens: &[Token]) -> Vec<Key> {
    tokens
        .iter()
        .filter_map(|t| match t {
            Token::Key(k) if !k.pattern.is_empty() => Some(k.clone()),
            _ => None,
        })
        .collect()
}

/// A successful match: the matched text, its offset and the extracted params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub path: String,
    pub index: usize,
    pub params: Params,
}

/// Matches paths against a template and extracts its parameters.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
    keys: Vec<Key>,
}

impl PathMatcher {
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        Self::with_options(template, &RegexOptions::default())
    }

    pub fn with_options(template: &str, options: &RegexOptions) -> Result<Self, TemplateError> {
        let tokens = parse(template)?;
        let source = tokens_to_regex_source(&tokens, options);
        Ok(Self {
            regex: compile(&source, options.sensitive)?,
            keys: keys_of(&tokens),
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let caps = self.regex.captures(path).ok().flatten()?;
        let whole = caps.get(0)?;
        let mut params = Params::new();

        for (i, key) in self.keys.iter().enumerate() {
            let Some(group) = caps.get(i + 1) else {
                continue;
            };
            let value = group.as_str();
            if key.modifier.is_repeat() {
                let separator = format!("{}{}", key.prefix, key.suffix);
                let parts: Vec<String> = if separator.is_empty() {
                    value.chars().map(|c| c.to_string()).collect()
                } else {
                    value.split(separator.as_str()).map(str::to_string).collect()
                };
                params.insert(key.name.clone(), MultiValue::Many(parts));
            } else {
                params.insert(key.name.clone(), MultiValue::One(value.to_string()));
            }
        }

        Some(PathMatch {
            path: whole.as_str().to_string(),
            index: whole.start(),
            params,
        })
    }
}

/// Renders a template from a parameter map.
#[derive(Debug, Clone)]
pub struct PathRenderer {
    tokens: Vec<Token>,
    checks: Vec<Option<Regex>>,
    validate: bool,
}

impl PathRenderer {
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        Self::with_validation(template, true)
    }

    /// With `validate` off, values are inserted without checking them against the key pattern.
    pub fn with_validation(template: &str, validate: bool) -> Result<Self, TemplateError> {
        let tokens = parse(template)?;
        let checks = if validate {
            tokens
                .iter()
                .map(|t| match t {
                    Token::Key(k) => compile(&format!("^(?:{})$", k.pattern), false).map(Some),
                    Token::Literal(_) => Ok(None),
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![None; tokens.len()]
        };
        Ok(Self {
            tokens,
            checks,
            validate,
        })
    }

    fn check(&self, i: usize, key: &Key, segment: &str) -> Result<(), TemplateError> {
        if !self.validate {
            return Ok(());
        }
        if let Some(Some(re)) = self.checks.get(i) {
            if !re.is_match(segment).unwrap_or(false) {
                return Err(TemplateError::Invalid {
                    name: key.name.clone(),
                    pattern: key.pattern.clone(),
                    value: segment.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn render(&self, params: &Params) -> Result<String, TemplateError> {
        let mut path = String::new();

        for (i, token) in self.tokens.iter().enumerate() {
            let key = match token {
                Token::Literal(text) => {
                    path.push_str(text);
                    continue;
                }
                Token::Key(key) => key,
            };

            match params.get(&key.name) {
                Some(MultiValue::Many(values)) if key.modifier.is_repeat() => {
                    if values.is_empty() {
                        if key.modifier.is_optional() {
                            continue;
                        }
                        return Err(TemplateError::Empty(key.name.clone()));
                    }
                    for value in values {
                        self.check(i, key, value)?;
                        path.push_str(&key.prefix);
                        path.push_str(value);
                        path.push_str(&key.suffix);
                    }
                }
                Some(MultiValue::Many(values)) => {
                    // a catch-all captured by the source rendered into a single slot
                    let joined = values.join("/");
                    if self.validate {
                        return Err(TemplateError::UnexpectedRepeat(key.name.clone()));
                    }
                    path.push_str(&key.prefix);
                    path.push_str(&joined);
                    path.push_str(&key.suffix);
                }
                Some(MultiValue::One(value)) => {
                    self.check(i, key, value)?;
                    path.push_str(&key.prefix);
                    path.push_str(value);
                    path.push_str(&key.suffix);
                }
                None if key.modifier.is_optional() || key.pattern.is_empty() => {
                    if key.pattern.is_empty() {
                        path.push_str(&key.prefix);
                        path.push_str(&key.suffix);
                    }
                }
                None => {
                    return Err(TemplateError::MissingValue {
                        name: key.name.clone(),
                        expected: if key.modifier.is_repeat() { "an array" } else { "a string" },
                    });
                }
            }
        }

        Ok(path)
    }
}
