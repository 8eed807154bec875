use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

const EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("pyi", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("rs", "rust"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("scala", "scala"),
    ("sh", "bash"),
    ("bash", "bash"),
    ("zsh", "bash"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
    ("json", "json"),
    ("toml", "toml"),
    ("md", "markdown"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("less", "less"),
    ("vue", "vue"),
    ("svelte", "svelte"),
];

/// Directories never walked.
pub const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    "dist",
    "build",
    "vendor",
];

pub fn detect(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Extensions belonging to `language`.
pub fn extensions_of(language: &str) -> Vec<&'static str> {
    EXTENSIONS
        .iter()
        .filter(|(_, lang)| *lang == language)
        .map(|(ext, _)| *ext)
        .collect()
}

/// Line patterns for top-level symbols. The last capture group is the name.
fn symbol_patterns(language: &str) -> &'static [(Regex, &'static str)] {
    static TABLE: OnceLock<Vec<(&'static str, Vec<(Regex, &'static str)>)>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let raw: &[(&str, &[(&str, &str)])] = &[
            (
                "python",
                &[
                    (r"^\s*class\s+(\w+)", "class"),
                    (r"^\s*(?:async\s+)?def\s+(\w+)\s*\(", "function"),
                ],
            ),
            (
                "javascript",
                &[
                    (r"^\s*(?:export\s+)?class\s+(\w+)", "class"),
                    (r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)\s*\(", "function"),
                    (
                        r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\(.*?\)\s*=>",
                        "function",
                    ),
                ],
            ),
            (
                "typescript",
                &[
                    (r"^\s*(?:export\s+)?class\s+(\w+)", "class"),
                    (r"^\s*(?:export\s+)?interface\s+(\w+)", "interface"),
                    (r"^\s*(?:export\s+)?type\s+(\w+)\s*=", "type"),
                    (r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)", "function"),
                ],
            ),
            (
                "go",
                &[
                    (r"^type\s+(\w+)\s+struct\s*\{", "struct"),
                    (r"^type\s+(\w+)\s+interface\s*\{", "interface"),
                    (r"^func\s+(?:\([^)]+\)\s+)?(\w+)\s*\(", "function"),
                ],
            ),
            (
                "rust",
                &[
                    (r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)", "struct"),
                    (r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(\w+)", "enum"),
                    (r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)", "trait"),
                    (r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)", "function"),
                ],
            ),
            (
                "java",
                &[
                    (r"^\s*(?:public|private|protected)?\s*(?:static\s+)?class\s+(\w+)", "class"),
                    (r"^\s*(?:public|private|protected)?\s*interface\s+(\w+)", "interface"),
                ],
            ),
        ];

        raw.iter()
            .map(|(lang, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|(p, kind)| Regex::new(p).ok().map(|re| (re, *kind)))
                    .collect();
                (*lang, compiled)
            })
            .collect()
    });

    table
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, patterns)| patterns.as_slice())
        .unwrap_or(&[])
}

/// Extract `(name, kind, 1-based line)` for each symbol line in `source`.
pub fn extract_symbols(language: &str, source: &str) -> Vec<(String, &'static str, usize)> {
    let patterns = symbol_patterns(language);
    if patterns.is_empty() {
        return Vec::new();
    }

    source
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            patterns.iter().find_map(|(re, kind)| {
                let caps = re.captures(line)?;
                let name = caps.iter().flatten().last()?.as_str().to_string();
                Some((name, *kind, i + 1))
            })
        })
        .collect()
}

/// Regex source matching a definition of `symbol` in `language`.
pub fn definition_pattern(language: &str, symbol: &str) -> Option<String> {
    let s = regex::escape(symbol);
    let pattern = match language {
        "python" => format!(r"^\s*(def|class|async def)\s+{s}\s*[(\[:]"),
        "javascript" => format!(r"^\s*(export\s+)?(function|class|const|let|var)\s+{s}\s*[=({{]"),
        "typescript" => {
            format!(r"^\s*(export\s+)?(function|class|const|let|interface|type)\s+{s}\s*[=(<{{]")
        }
        "go" => format!(r"^\s*(func|type)\s+(\([^)]+\)\s+)?{s}\s*[(\[]|^\s*type\s+{s}\s"),
        "rust" => format!(r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?(fn|struct|enum|trait|type)\s+{s}\b"),
        "java" => format!(r"^\s*(public|private|protected)?\s*(static\s+)?[\w<>\[\]]+\s+{s}\s*\("),
        _ => return None,
    };
    Some(pattern)
}

/// Languages that have a definition pattern.
pub const DEFINITION_LANGUAGES: &[&str] =
    &["python", "javascript", "typescript", "go", "rust", "java"];
