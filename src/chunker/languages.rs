//! Lazily-populated tree-sitter grammar catalogue, keyed by language tag,
//! with a one-shot failure marker to avoid repeated load attempts (§9).
//!
//! Capture queries are restricted to the closed capture-name set from §4.1:
//! `function | method | arrow_function | constructor | class | interface |
//! struct | enum | trait | impl | module | type | statement`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Function,
    Class,
    Block,
}

/// Map a tree-sitter capture name onto a chunk-kind bucket per §4.1 step 2.
pub fn capture_kind(name: &str) -> Option<CaptureKind> {
    match name {
        "function" | "method" | "arrow_function" | "constructor" => Some(CaptureKind::Function),
        "class" | "interface" | "struct" | "enum" | "trait" | "impl" | "module" => {
            Some(CaptureKind::Class)
        }
        "type" | "statement" => Some(CaptureKind::Block),
        _ => None,
    }
}

pub struct LanguageSpec {
    pub tag: &'static str,
    pub extensions: &'static [&'static str],
    pub language: fn() -> Language,
    pub query_src: &'static str,
}

fn rust_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "rust",
        extensions: &["rs"],
        language: tree_sitter_rust::language,
        query_src: r#"
            (function_item) @function
            (impl_item) @impl
            (struct_item) @struct
            (enum_item) @enum
            (trait_item) @trait
            (mod_item) @module
        "#,
    }
}

fn typescript_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "typescript",
        extensions: &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        language: tree_sitter_typescript::language_tsx,
        query_src: r#"
            (function_declaration) @function
            (method_definition) @method
            (arrow_function) @arrow_function
            (class_declaration) @class
            (interface_declaration) @interface
            (type_alias_declaration) @type
        "#,
    }
}

fn python_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "python",
        extensions: &["py"],
        language: tree_sitter_python::language,
        query_src: r#"
            (function_definition) @function
            (class_definition) @class
        "#,
    }
}

#[cfg(feature = "lang-go")]
fn go_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "go",
        extensions: &["go"],
        language: tree_sitter_go::language,
        query_src: r#"
            (function_declaration) @function
            (method_declaration) @method
            (type_declaration) @type
        "#,
    }
}

#[cfg(feature = "lang-java")]
fn java_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "java",
        extensions: &["java"],
        language: tree_sitter_java::language,
        query_src: r#"
            (method_declaration) @method
            (constructor_declaration) @constructor
            (class_declaration) @class
            (interface_declaration) @interface
            (enum_declaration) @enum
        "#,
    }
}

#[cfg(feature = "lang-csharp")]
fn csharp_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "csharp",
        extensions: &["cs"],
        language: tree_sitter_c_sharp::language,
        query_src: r#"
            (method_declaration) @method
            (constructor_declaration) @constructor
            (class_declaration) @class
            (interface_declaration) @interface
            (enum_declaration) @enum
        "#,
    }
}

#[cfg(feature = "lang-php")]
fn php_language() -> Language {
    tree_sitter_php::LANGUAGE_PHP.into()
}

#[cfg(feature = "lang-php")]
fn php_spec() -> LanguageSpec {
    LanguageSpec {
        tag: "php",
        extensions: &["php"],
        language: php_language,
        query_src: r#"
            (function_definition) @function
            (method_declaration) @method
            (class_declaration) @class
            (interface_declaration) @interface
        "#,
    }
}

struct Catalogue {
    specs: Vec<LanguageSpec>,
    by_ext: HashMap<&'static str, usize>,
    compiled: std::sync::Mutex<HashMap<usize, Option<std::sync::Arc<Query>>>>,
}

impl Catalogue {
    fn build() -> Self {
        let mut specs = vec![rust_spec(), typescript_spec(), python_spec()];
        #[cfg(feature = "lang-go")]
        specs.push(go_spec());
        #[cfg(feature = "lang-java")]
        specs.push(java_spec());
        #[cfg(feature = "lang-csharp")]
        specs.push(csharp_spec());
        #[cfg(feature = "lang-php")]
        specs.push(php_spec());

        let mut by_ext = HashMap::new();
        for (idx, spec) in specs.iter().enumerate() {
            for ext in spec.extensions {
                by_ext.insert(*ext, idx);
            }
        }

        Self {
            specs,
            by_ext,
            compiled: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

fn catalogue() -> &'static Catalogue {
    static CAT: OnceLock<Catalogue> = OnceLock::new();
    CAT.get_or_init(Catalogue::build)
}

pub fn language_tag_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let idx = *catalogue().by_ext.get(ext.as_str())?;
    Some(catalogue().specs[idx].tag)
}

/// Returns a compiled `Query` and the `Language` for `path`'s extension, or
/// `None` if no grammar is registered or the grammar failed to load once
/// before (one-shot failure marker: compile failures are cached as `None`
/// and never retried for the process lifetime).
pub fn grammar_for_path(path: &Path) -> Option<(Language, std::sync::Arc<Query>)> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let cat = catalogue();
    let idx = *cat.by_ext.get(ext.as_str())?;
    let spec = &cat.specs[idx];
    let language = (spec.language)();

    let mut compiled = cat.compiled.lock().unwrap();
    let entry = compiled.entry(idx).or_insert_with(|| match Query::new(&language, spec.query_src) {
        Ok(q) => Some(std::sync::Arc::new(q)),
        Err(e) => {
            tracing::warn!(language = spec.tag, error = %e, "failed to compile capture query");
            None
        }
    });

    entry.clone().map(|q| (language, q))
}
