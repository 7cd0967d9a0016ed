// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wildcard topic matcher and compiled-pattern cache.
//!
//! `+` matches one non-empty path segment (no `/`); `*` matches any run of characters,
//! including zero-length and including `/`. Matching is a direct two-pointer walk over
//! compiled literal/wildcard segments rather than a regex engine, per the portability
//! note in the original design: no character needs escaping since nothing but `+` and
//! `*` is ever special.

use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Lit(String),
    Plus,
    Star,
}

/// A pattern compiled into alternating literal runs and wildcard markers.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    segments: Vec<Segment>,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> CompiledPattern {
        let mut segments = Vec::new();
        let mut literal = String::new();

        for ch in pattern.chars() {
            match ch {
                '+' | '*' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Lit(std::mem::take(&mut literal)));
                    }
                    segments.push(if ch == '+' { Segment::Plus } else { Segment::Star });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Lit(literal));
        }

        CompiledPattern { segments }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match_from(&self.segments, topic.as_bytes(), 0)
    }
}

fn match_from(segments: &[Segment], topic: &[u8], pos: usize) -> bool {
    let Some((head, tail)) = segments.split_first() else {
        return pos == topic.len();
    };

    match head {
        Segment::Lit(lit) => {
            let bytes = lit.as_bytes();
            topic[pos..].starts_with(bytes) && match_from(tail, topic, pos + bytes.len())
        }
        Segment::Star => {
            (pos..=topic.len()).any(|k| match_from(tail, topic, k))
        }
        Segment::Plus => {
            let mut end = pos;
            while end < topic.len() && topic[end] != b'/' {
                end += 1;
            }
            if end == pos {
                return false;
            }
            (pos + 1..=end).rev().any(|k| match_from(tail, topic, k))
        }
    }
}

/// Maps pattern text to its compiled form. Populated lazily; never evicted.
#[derive(Default)]
pub struct PatternCache {
    compiled: HashMap<String, Rc<CompiledPattern>>,
}

impl PatternCache {
    pub fn new() -> PatternCache {
        PatternCache::default()
    }

    pub fn get_or_compile(&mut self, pattern: &str) -> Rc<CompiledPattern> {
        if let Some(compiled) = self.compiled.get(pattern) {
            return compiled.clone();
        }

        let compiled = Rc::new(CompiledPattern::compile(pattern));
        self.compiled.insert(pattern.to_owned(), compiled.clone());
        compiled
    }

    pub fn matches(&mut self, pattern: &str, topic: &str) -> bool {
        self.get_or_compile(pattern).matches(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, topic: &str) -> bool {
        CompiledPattern::compile(pattern).matches(topic)
    }

    #[test]
    fn literal_pattern_matches_only_itself() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b/d"));
        assert!(!matches("a/b/c", "a/b/c/d"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches("*", "a"));
        assert!(matches("*", "a/b/c"));
        assert!(matches("*", ""));
    }

    #[test]
    fn plus_never_matches_a_topic_with_slash() {
        assert!(!matches("+", "a/b"));
        assert!(matches("+", "a"));
        assert!(!matches("+", ""));
    }

    #[test]
    fn plus_wildcard_scenario() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/d/c"));
        assert!(!matches("a/+/c", "a//c"));
    }

    #[test]
    fn star_wildcard_scenario() {
        assert!(matches("a/*", "a/b"));
        assert!(matches("a/*", "a/b/c"));
        assert!(matches("a/*", "a/"));
        assert!(!matches("a/*", "a"));
    }

    #[test]
    fn cache_reuses_compiled_pattern() {
        let mut cache = PatternCache::new();
        let first = cache.get_or_compile("a/+/c");
        let second = cache.get_or_compile("a/+/c");

        assert!(Rc::ptr_eq(&first, &second));
        assert!(cache.matches("a/+/c", "a/b/c"));
    }

    #[test]
    fn dot_is_a_literal_character() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "axb"));
    }
}
