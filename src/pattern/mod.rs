//! Pattern Compiler
//!
//! Turns Graphite query text into immutable, canonical [`PatternNode`]s:
//!
//! - **AST**: matcher tree types with canonical text
//! - **Parser**: glob and `seriesByTag` grammar (nom)
//! - **Matcher**: direct evaluation against paths, used as the post-filter
//! - **Cache**: bounded memo of compiled patterns
//!
//! # Example
//!
//! ```rust,ignore
//! use carbonhouse::pattern::{PatternCompiler, CompileOptions};
//!
//! let compiler = PatternCompiler::new(CompileOptions::default(), 10_000);
//! let node = compiler.compile("servers.{web1,web2}.cpu.*")?;
//! assert!(node.matches("servers.web1.cpu.user"));
//! ```

mod ast;
mod cache;
mod error;
mod matcher;
mod parser;

pub use ast::{
    GlobPattern, Matcher, PatternNode, Segment, TagFilter, TagOp, TagQuery, SEPARATOR,
};
pub use cache::CompiledCache;
pub use error::{CompileError, CompileResult};
pub use matcher::parse_tagged_name;
pub use parser::{compile, validate_regex, CompileOptions};

use std::sync::Arc;

/// Compiler front end with a compiled-pattern cache
pub struct PatternCompiler {
    options: CompileOptions,
    cache: CompiledCache,
}

impl PatternCompiler {
    pub fn new(options: CompileOptions, cache_size: usize) -> Self {
        Self {
            options,
            cache: CompiledCache::new(cache_size),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile, reusing a previously compiled node for the same text.
    /// Errors are not cached.
    pub fn compile(&self, raw: &str) -> CompileResult<Arc<PatternNode>> {
        if let Some(node) = self.cache.get(raw) {
            return Ok(node);
        }
        let node = Arc::new(compile(raw, &self.options)?);
        self.cache.insert(raw, Arc::clone(&node));
        Ok(node)
    }

    /// Number of cached compiled patterns
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_caches_success_only() {
        let compiler = PatternCompiler::new(CompileOptions::default(), 16);
        let a = compiler.compile("a.b.*").unwrap();
        let b = compiler.compile("a.b.*").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(compiler.compile("a.**.b.**").is_err());
        assert_eq!(compiler.cached(), 1);
    }
}
