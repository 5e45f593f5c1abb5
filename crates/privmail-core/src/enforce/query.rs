//! Path-query evaluation over the normalized document tree
//!
//! Supports the query subset policy conditions use: union (`a | b`),
//! child (`/`) and descendant (`//`, `.//`) steps, name or `*` tests, and
//! predicates combining `@attr='value'`, `@attr`, `contains(., 'text')`,
//! `contains(@attr, 'text')` with `and`, `or`, and `not(...)`.
//!
//! Unsupported or malformed syntax yields `Error::Query`; the engine
//! isolates that to the affected rule.

use privmail_common::{Error, Result};

use crate::message::DocNode;

/// Evaluate a query expression against a document tree, returning matched
/// nodes in document order
pub fn evaluate<'a>(expr: &str, root: &'a DocNode) -> Result<Vec<&'a DocNode>> {
    let tokens = tokenize(expr)?;
    let query = Parser::new(tokens).parse_query()?;

    let mut matches: Vec<&'a DocNode> = Vec::new();
    for path in &query.paths {
        for node in eval_path(path, root) {
            // Union semantics: each node appears once, first position wins
            if !matches.iter().any(|m| std::ptr::eq(*m, node)) {
                matches.push(node);
            }
        }
    }
    Ok(matches)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    Pipe,
    Star,
    At,
    Eq,
    Comma,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Name(String),
    Literal(String),
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(Error::Query(format!(
                        "Unterminated string literal at position {}",
                        i
                    )));
                }
                tokens.push(Token::Literal(chars[start..j].iter().collect()));
                i = j + 1;
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(Error::Query(format!(
                    "Unexpected character '{}' at position {}",
                    c, i
                )))
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug)]
struct Query {
    paths: Vec<Path>,
}

#[derive(Debug)]
struct Path {
    steps: Vec<Step>,
}

#[derive(Debug)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Pred>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug)]
enum NameTest {
    Any,
    Name(String),
}

#[derive(Debug)]
enum Pred {
    AttrEquals(String, String),
    AttrExists(String),
    Contains(Target, String),
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
    Not(Box<Pred>),
}

#[derive(Debug)]
enum Target {
    /// String-value of the node itself (`.`)
    Node,
    Attr(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(Error::Query(format!(
                "Expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_query(mut self) -> Result<Query> {
        let mut paths = vec![self.parse_path()?];
        while self.peek() == Some(&Token::Pipe) {
            self.next();
            paths.push(self.parse_path()?);
        }
        if let Some(token) = self.peek() {
            return Err(Error::Query(format!(
                "Unexpected trailing token {:?}",
                token
            )));
        }
        Ok(Query { paths })
    }

    fn parse_path(&mut self) -> Result<Path> {
        // Leading '.' anchors at the context node, which is always the root
        if self.peek() == Some(&Token::Dot) {
            self.next();
        }

        let mut steps = Vec::new();
        loop {
            let axis = match self.peek() {
                Some(Token::DoubleSlash) => {
                    self.next();
                    Axis::Descendant
                }
                Some(Token::Slash) => {
                    self.next();
                    Axis::Child
                }
                Some(Token::Name(_)) | Some(Token::Star) if steps.is_empty() => Axis::Child,
                _ => break,
            };

            let test = match self.next() {
                Some(Token::Name(name)) => NameTest::Name(name),
                Some(Token::Star) => NameTest::Any,
                other => {
                    return Err(Error::Query(format!(
                        "Expected element name after step separator, found {:?}",
                        other
                    )))
                }
            };

            let mut predicates = Vec::new();
            while self.peek() == Some(&Token::LBracket) {
                self.next();
                predicates.push(self.parse_pred_or()?);
                self.expect(Token::RBracket)?;
            }

            steps.push(Step {
                axis,
                test,
                predicates,
            });
        }

        if steps.is_empty() {
            return Err(Error::Query("Empty path expression".to_string()));
        }

        Ok(Path { steps })
    }

    fn parse_pred_or(&mut self) -> Result<Pred> {
        let mut left = self.parse_pred_and()?;
        while matches!(self.peek(), Some(Token::Name(n)) if n == "or") {
            self.next();
            let right = self.parse_pred_and()?;
            left = Pred::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pred_and(&mut self) -> Result<Pred> {
        let mut left = self.parse_pred_atom()?;
        while matches!(self.peek(), Some(Token::Name(n)) if n == "and") {
            self.next();
            let right = self.parse_pred_atom()?;
            left = Pred::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pred_atom(&mut self) -> Result<Pred> {
        match self.next() {
            Some(Token::At) => {
                let name = match self.next() {
                    Some(Token::Name(name)) => name,
                    other => {
                        return Err(Error::Query(format!(
                            "Expected attribute name after '@', found {:?}",
                            other
                        )))
                    }
                };
                if self.peek() == Some(&Token::Eq) {
                    self.next();
                    match self.next() {
                        Some(Token::Literal(value)) => Ok(Pred::AttrEquals(name, value)),
                        other => Err(Error::Query(format!(
                            "Expected string literal after '=', found {:?}",
                            other
                        ))),
                    }
                } else {
                    Ok(Pred::AttrExists(name))
                }
            }
            Some(Token::Name(name)) if name == "contains" => {
                self.expect(Token::LParen)?;
                let target = match self.next() {
                    Some(Token::Dot) => Target::Node,
                    Some(Token::At) => match self.next() {
                        Some(Token::Name(attr)) => Target::Attr(attr),
                        other => {
                            return Err(Error::Query(format!(
                                "Expected attribute name after '@', found {:?}",
                                other
                            )))
                        }
                    },
                    other => {
                        return Err(Error::Query(format!(
                            "Unsupported contains() argument {:?}",
                            other
                        )))
                    }
                };
                self.expect(Token::Comma)?;
                let needle = match self.next() {
                    Some(Token::Literal(value)) => value,
                    other => {
                        return Err(Error::Query(format!(
                            "Expected string literal in contains(), found {:?}",
                            other
                        )))
                    }
                };
                self.expect(Token::RParen)?;
                Ok(Pred::Contains(target, needle))
            }
            Some(Token::Name(name)) if name == "not" => {
                self.expect(Token::LParen)?;
                let inner = self.parse_pred_or()?;
                self.expect(Token::RParen)?;
                Ok(Pred::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.parse_pred_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => Err(Error::Query(format!(
                "Unsupported function or keyword '{}'",
                name
            ))),
            other => Err(Error::Query(format!(
                "Unexpected token {:?} in predicate",
                other
            ))),
        }
    }
}

fn eval_path<'a>(path: &Path, root: &'a DocNode) -> Vec<&'a DocNode> {
    let mut current: Vec<&'a DocNode> = vec![root];

    for step in &path.steps {
        let mut next: Vec<&'a DocNode> = Vec::new();
        for node in &current {
            let candidates: Vec<&DocNode> = match step.axis {
                Axis::Child => node.children.iter().collect(),
                Axis::Descendant => node.descendants(),
            };
            for candidate in candidates {
                if !name_matches(&step.test, candidate) {
                    continue;
                }
                if !step.predicates.iter().all(|p| eval_pred(p, candidate)) {
                    continue;
                }
                if !next.iter().any(|n| std::ptr::eq(*n, candidate)) {
                    next.push(candidate);
                }
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }

    current
}

fn name_matches(test: &NameTest, node: &DocNode) -> bool {
    match test {
        NameTest::Any => true,
        NameTest::Name(name) => node.name == *name,
    }
}

fn eval_pred(pred: &Pred, node: &DocNode) -> bool {
    match pred {
        Pred::AttrEquals(name, value) => node.attr(name) == Some(value.as_str()),
        Pred::AttrExists(name) => node.attr(name).is_some(),
        Pred::Contains(Target::Node, needle) => node.string_value().contains(needle),
        Pred::Contains(Target::Attr(name), needle) => {
            node.attr(name).is_some_and(|v| v.contains(needle))
        }
        Pred::And(left, right) => eval_pred(left, node) && eval_pred(right, node),
        Pred::Or(left, right) => eval_pred(left, node) || eval_pred(right, node),
        Pred::Not(inner) => !eval_pred(inner, node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{normalize, EmailMessage, Header, MimePart};
    use pretty_assertions::assert_eq;

    fn sample_doc() -> crate::message::NormalizedDocument {
        let mut msg = EmailMessage::new();
        msg.headers.push(Header {
            name: "Received".to_string(),
            value: "by relay-1".to_string(),
        });
        msg.headers.push(Header {
            name: "Subject".to_string(),
            value: "quarterly numbers".to_string(),
        });
        msg.headers.push(Header {
            name: "Received".to_string(),
            value: "by relay-2".to_string(),
        });
        msg.append_part(MimePart::text(
            "text/html",
            "<div><img src=\"https://tracker.com/pixel.gif\"/><p>hello</p></div>",
        ));
        msg.append_part(MimePart::text("text/plain", "plain text"));
        normalize(&msg)
    }

    #[test]
    fn test_descendant_step_with_attr_predicate() {
        let doc = sample_doc();
        let matches = evaluate(".//header[@name='Received']", &doc.root).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].text.as_deref(), Some("by relay-1"));
    }

    #[test]
    fn test_union_preserves_first_match_order() {
        let doc = sample_doc();
        let matches = evaluate(
            ".//header[@name='Received'] | .//header[@name='Resent-From']",
            &doc.root,
        )
        .unwrap();
        assert_eq!(matches.len(), 2);

        let matches = evaluate(
            ".//header[@name='Subject'] | .//header[@name='Received']",
            &doc.root,
        )
        .unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].attr("name"), Some("Subject"));
    }

    #[test]
    fn test_contains_on_node_text_with_or() {
        let doc = sample_doc();
        let matches = evaluate(
            ".//raw-content[contains(., 'tracker.com') or contains(., 'analytics.com')]",
            &doc.root,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_contains_on_attribute() {
        let doc = sample_doc();
        let matches = evaluate(".//img[contains(@src, 'pixel.gif')]", &doc.root).unwrap();
        assert_eq!(matches.len(), 1);
        let matches = evaluate(".//img[contains(@src, 'safe.example')]", &doc.root).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_child_axis_and_wildcard() {
        let doc = sample_doc();
        let matches = evaluate("headers/header", &doc.root).unwrap();
        assert_eq!(matches.len(), 3);
        let matches = evaluate("body/*", &doc.root).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_and_and_not_predicates() {
        let doc = sample_doc();
        let matches = evaluate(
            ".//header[@name='Received' and contains(., 'relay-1')]",
            &doc.root,
        )
        .unwrap();
        assert_eq!(matches.len(), 1);

        let matches = evaluate(".//header[not(@name='Received')]", &doc.root).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].attr("name"), Some("Subject"));
    }

    #[test]
    fn test_zero_matches_is_ok() {
        let doc = sample_doc();
        let matches = evaluate(".//no-such-element", &doc.root).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_malformed_expressions_yield_query_errors() {
        let doc = sample_doc();
        for expr in [
            "///",
            ".//header[@name=",
            ".//header[starts-with(., 'x')]",
            "count(.//header)",
            ".//header[contains(., 'x')",
            "",
        ] {
            let err = evaluate(expr, &doc.root).unwrap_err();
            assert_eq!(err.code(), "QUERY_ERROR", "expected error for {:?}", expr);
        }
    }
}
