//! 路径匹配。
//!
//! # 教案式说明
//! - **意图 (Why)**：处理器按路径模式挑选消息；字面量、通配与自定义谓词应可互换，
//!   因此统一收敛为单一能力的 [`PathMatcher`] 接口；
//! - **语法 (What)**：段分隔符为 `:`；`*` 匹配一个或多个非 `:` 字符；
//!   连续两个及以上的 `*` 匹配任意字符（可为空）；其余字符按字面匹配；整串锚定匹配；
//! - **实现 (How)**：模式在注册时编译为记号序列，匹配时自右向左做一维动态规划，
//!   复杂度为 `O(记号数 × 路径长度)`，不存在回溯爆炸。

use std::{fmt, sync::Arc};

/// 段分隔符。
pub const SEGMENT_SEPARATOR: char = ':';

/// 路径匹配能力。
pub trait PathMatcher: Send + Sync + 'static {
    /// 判断路径是否匹配。
    fn matches(&self, path: &str) -> bool;
}

impl<F> PathMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn matches(&self, path: &str) -> bool {
        self(path)
    }
}

/// 精确匹配的字面路径。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiteralPath(String);

impl LiteralPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }
}

impl PathMatcher for LiteralPath {
    fn matches(&self, path: &str) -> bool {
        self.0 == path
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(Vec<char>),
    /// 一个或多个非分隔符字符。
    Segment,
    /// 零个或多个任意字符。
    Any,
}

/// 编译后的通配模式。
///
/// ```
/// use spark_courier::{GlobPattern, PathMatcher};
///
/// let glob = GlobPattern::compile("user:*:profile");
/// assert!(glob.matches("user:42:profile"));
/// assert!(!glob.matches("user:42:x:profile"));
/// assert!(GlobPattern::compile("user:**").matches("user:42:x"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// 编译模式文本。
    pub fn compile(pattern: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '*' {
                literal.push(ch);
                continue;
            }
            let mut run = 1;
            while chars.next_if_eq(&'*').is_some() {
                run += 1;
            }
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(if run == 1 { Token::Segment } else { Token::Any });
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Self {
            source: pattern.to_owned(),
            tokens,
        }
    }

    /// 模式原文。
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 模式中是否含有通配符。
    pub fn has_wildcards(&self) -> bool {
        self.tokens
            .iter()
            .any(|token| !matches!(token, Token::Literal(_)))
    }
}

impl PathMatcher for GlobPattern {
    fn matches(&self, path: &str) -> bool {
        let chars: Vec<char> = path.chars().collect();
        let len = chars.len();
        // rest[j]：剩余记号能否恰好匹配 chars[j..]。
        let mut rest = vec![false; len + 1];
        rest[len] = true;
        for token in self.tokens.iter().rev() {
            let mut current = vec![false; len + 1];
            match token {
                Token::Literal(literal) => {
                    for start in 0..=len {
                        let end = start + literal.len();
                        current[start] =
                            end <= len && chars[start..end] == literal[..] && rest[end];
                    }
                }
                Token::Segment => {
                    for start in (0..len).rev() {
                        current[start] = chars[start] != SEGMENT_SEPARATOR
                            && (rest[start + 1] || current[start + 1]);
                    }
                }
                Token::Any => {
                    for start in (0..=len).rev() {
                        current[start] = rest[start] || (start < len && current[start + 1]);
                    }
                }
            }
            rest = current;
        }
        rest[0]
    }
}

/// 处理器注册时使用的模式：匹配全部路径，或交给某个匹配器。
#[derive(Clone)]
pub enum PathPattern {
    /// 不限路径。
    Any,
    /// 由匹配器判定。
    Matcher(Arc<dyn PathMatcher>),
}

impl PathPattern {
    /// 使用自定义匹配器。
    pub fn matcher(matcher: impl PathMatcher) -> Self {
        PathPattern::Matcher(Arc::new(matcher))
    }

    /// 编译模式文本；不含通配符时退化为字面匹配。
    pub fn glob(pattern: &str) -> Self {
        let glob = GlobPattern::compile(pattern);
        if glob.has_wildcards() {
            Self::matcher(glob)
        } else {
            Self::matcher(LiteralPath::new(pattern))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Any => true,
            PathPattern::Matcher(matcher) => matcher.matches(path),
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Any => f.write_str("PathPattern::Any"),
            PathPattern::Matcher(_) => f.write_str("PathPattern::Matcher(..)"),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        Self::glob(pattern)
    }
}

impl From<String> for PathPattern {
    fn from(pattern: String) -> Self {
        Self::glob(&pattern)
    }
}

impl From<Option<&str>> for PathPattern {
    fn from(pattern: Option<&str>) -> Self {
        pattern.map_or(PathPattern::Any, Self::glob)
    }
}

impl From<GlobPattern> for PathPattern {
    fn from(glob: GlobPattern) -> Self {
        Self::matcher(glob)
    }
}

impl From<LiteralPath> for PathPattern {
    fn from(literal: LiteralPath) -> Self {
        Self::matcher(literal)
    }
}
