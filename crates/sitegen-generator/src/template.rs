//! Template parsing and include-aware rendering.
//!
//! Templates are literal text with a small set of `{{ ... }}` actions:
//!
//! - `{{ render "fragments/header.html" }}` inlines another template,
//!   resolved relative to the including template's directory
//! - `{{ asset "style.css" }}` substitutes a bundle's output path from the
//!   [`AssetManifest`]
//! - `{{ "{{" }}` emits a string literal verbatim
//! - `{{/* note */}}` is a comment; it must make up the whole action
//!
//! `{{- ` and ` -}}` trim whitespace from the adjacent literal text. A
//! template is parsed completely before any action runs.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use sitegen_core::pathsafe::{self, PathError};
use thiserror::Error;
use tracing::trace;

use crate::assets::AssetManifest;

/// Template parsing and rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template path could not be made absolute.
    #[error("resolve template path {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The template lies outside the source root.
    #[error("template path {} is outside source root", path.display())]
    OutsideRoot { path: PathBuf },

    /// A template includes itself, directly or indirectly.
    #[error("render include cycle detected: {}", format_chain(.chain))]
    Cycle { chain: Vec<PathBuf> },

    /// The template file could not be read.
    #[error("read template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid action syntax.
    #[error("parse template {template}:{line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    /// `render` with an empty path.
    #[error("include path cannot be empty (in {})", template.display())]
    EmptyInclude { template: PathBuf },

    /// Include target escapes the source root.
    #[error("include path {include:?} in {} resolves outside source root", template.display())]
    IncludeOutsideRoot { include: String, template: PathBuf },

    /// Include target is reached through a symlink.
    #[error("include path {include:?} in {} is invalid: {source}", template.display())]
    IncludeSymlink {
        include: String,
        template: PathBuf,
        #[source]
        source: PathError,
    },

    /// Include target does not exist or cannot be inspected.
    #[error("stat include {include:?} in {}: {source}", template.display())]
    IncludeMissing {
        include: String,
        template: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Include target is a directory.
    #[error("include path {include:?} in {} resolves to a directory", template.display())]
    IncludeDirectory { include: String, template: PathBuf },

    /// `asset` with a blank name.
    #[error("asset name cannot be empty (in {})", template.display())]
    EmptyAsset { template: PathBuf },

    /// `asset` naming a bundle the manifest does not know.
    #[error("asset {name:?} not found in manifest (in {})", template.display())]
    UnknownAsset { name: String, template: PathBuf },
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A parsed template element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal bytes copied to the output unchanged.
    Text(Vec<u8>),
    /// `render "path"`.
    Include { path: String, line: usize },
    /// `asset "name"`.
    Asset { name: String, line: usize },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source. `name` is used in error messages.
    ///
    /// Literal text is kept as raw bytes, so sources in any ASCII-compatible
    /// encoding pass through untouched. Only directive arguments must be
    /// UTF-8.
    pub fn parse(name: impl Into<String>, source: impl AsRef<[u8]>) -> Result<Self> {
        let name = name.into();
        let source = source.as_ref();
        let mut nodes = Vec::new();
        let mut pos = 0;
        let mut line = 1;
        let mut trim_next = false;

        while let Some(offset) = find(&source[pos..], b"{{") {
            let start = pos + offset;
            let mut literal = &source[pos..start];
            if trim_next {
                literal = trim_space_start(literal);
            }
            line += count_lines(&source[pos..start]);

            let mut cursor = Cursor::new(source, start + 2);
            if cursor.eat_left_trim() {
                literal = trim_space_end(literal);
            }
            push_text(&mut nodes, literal);

            let action = cursor.action().map_err(|message| TemplateError::Syntax {
                template: name.clone(),
                line,
                message,
            })?;
            trim_next = action.trim_right;

            match action.into_node(line) {
                Ok(Some(node)) => push_node(&mut nodes, node),
                Ok(None) => {}
                Err(message) => {
                    return Err(TemplateError::Syntax {
                        template: name,
                        line,
                        message,
                    });
                }
            }

            line += count_lines(&source[start..cursor.pos]);
            pos = cursor.pos;
        }

        let mut literal = &source[pos..];
        if trim_next {
            literal = trim_space_start(literal);
        }
        push_text(&mut nodes, literal);

        Ok(Self { name, nodes })
    }

    /// Get the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parsed elements in document order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn count_lines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&byte| byte == b'\n').count()
}

/// Whitespace as the trim markers understand it.
fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

fn trim_space_start(bytes: &[u8]) -> &[u8] {
    let skip = bytes.iter().take_while(|&&byte| is_space(byte)).count();
    &bytes[skip..]
}

fn trim_space_end(bytes: &[u8]) -> &[u8] {
    let keep = bytes.len() - bytes.iter().rev().take_while(|&&byte| is_space(byte)).count();
    &bytes[..keep]
}

fn push_text(nodes: &mut Vec<Node>, text: &[u8]) {
    if !text.is_empty() {
        push_node(nodes, Node::Text(text.to_vec()));
    }
}

fn push_node(nodes: &mut Vec<Node>, node: Node) {
    if let (Some(Node::Text(previous)), Node::Text(text)) = (nodes.last_mut(), &node) {
        previous.extend_from_slice(text);
        return;
    }
    nodes.push(node);
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(Vec<u8>),
}

#[derive(Debug)]
struct Action {
    tokens: Vec<Token>,
    comment: bool,
    trim_right: bool,
}

impl Action {
    fn into_node(self, line: usize) -> std::result::Result<Option<Node>, String> {
        let mut tokens = self.tokens.into_iter();
        let Some(first) = tokens.next() else {
            return if self.comment {
                Ok(None)
            } else {
                Err("missing directive in action".to_string())
            };
        };
        let args: Vec<Token> = tokens.collect();

        match first {
            Token::Str(text) if args.is_empty() => Ok(Some(Node::Text(text))),
            Token::Str(text) => Err(format!(
                "unexpected arguments after string {:?}",
                String::from_utf8_lossy(&text)
            )),
            Token::Word(word) => {
                let argument = match args.as_slice() {
                    [Token::Str(argument)] => String::from_utf8(argument.clone())
                        .map_err(|_| format!("{word} argument is not valid UTF-8"))?,
                    _ => return Err(format!("{word} expects exactly one string argument")),
                };
                match word.as_str() {
                    "render" => Ok(Some(Node::Include {
                        path: argument,
                        line,
                    })),
                    "asset" => Ok(Some(Node::Asset {
                        name: argument,
                        line,
                    })),
                    other => Err(format!("function {other:?} not defined")),
                }
            }
        }
    }
}

/// Scanner over the inside of one `{{ ... }}` action.
struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a [u8], pos: usize) -> Self {
        Self { src, pos }
    }

    fn rest(&self) -> &'a [u8] {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - trim_space_start(rest).len();
    }

    /// Consume a `- ` left trim marker directly after `{{`.
    fn eat_left_trim(&mut self) -> bool {
        match self.rest() {
            [b'-', space, ..] if is_space(*space) => {
                self.pos += 2;
                true
            }
            _ => false,
        }
    }

    fn preceded_by_whitespace(&self) -> bool {
        self.pos > 0 && is_space(self.src[self.pos - 1])
    }

    /// Consume the closing delimiter if it comes next.
    fn eat_close(&mut self) -> Option<bool> {
        let rest = self.rest();
        if rest.starts_with(b"}}") {
            self.pos += 2;
            return Some(false);
        }
        if rest.starts_with(b"-}}") && self.preceded_by_whitespace() {
            self.pos += 3;
            return Some(true);
        }
        None
    }

    fn action(&mut self) -> std::result::Result<Action, String> {
        let mut action = Action {
            tokens: Vec::new(),
            comment: false,
            trim_right: false,
        };

        // A comment is only recognised as the whole action.
        if let Some(body) = self.rest().strip_prefix(b"/*") {
            let end = find(body, b"*/").ok_or("unclosed comment")?;
            self.pos += 2 + end + 2;
            self.skip_whitespace();
            action.comment = true;
            action.trim_right = self
                .eat_close()
                .ok_or("comment ends before closing delimiter")?;
            return Ok(action);
        }

        loop {
            self.skip_whitespace();
            if let Some(trim_right) = self.eat_close() {
                action.trim_right = trim_right;
                return Ok(action);
            }

            let rest = self.rest();
            let token = match rest.first() {
                None => return Err("unclosed action".to_string()),
                Some(b'"') => self.quoted()?,
                Some(b'`') => self.raw()?,
                Some(byte) if byte.is_ascii_alphabetic() || *byte == b'_' => self.word(),
                Some(_) => {
                    let ch = String::from_utf8_lossy(rest).chars().next().unwrap_or('\u{fffd}');
                    return Err(format!("unexpected {ch:?} in action"));
                }
            };
            action.tokens.push(token);
        }
    }

    fn word(&mut self) -> Token {
        let rest = self.rest();
        let len = rest
            .iter()
            .take_while(|byte| byte.is_ascii_alphanumeric() || **byte == b'_')
            .count();
        self.pos += len;
        Token::Word(String::from_utf8_lossy(&rest[..len]).into_owned())
    }

    fn quoted(&mut self) -> std::result::Result<Token, String> {
        let rest = self.rest();
        let mut value = Vec::new();
        let mut bytes = rest.iter().copied().enumerate().skip(1);

        while let Some((index, byte)) = bytes.next() {
            match byte {
                b'"' => {
                    self.pos += index + 1;
                    return Ok(Token::Str(value));
                }
                b'\\' => {
                    let escaped = match bytes.next() {
                        Some((_, b'n')) => b'\n',
                        Some((_, b't')) => b'\t',
                        Some((_, b'r')) => b'\r',
                        Some((_, b'\\')) => b'\\',
                        Some((_, b'"')) => b'"',
                        Some((_, other)) => {
                            return Err(format!("invalid escape \\{}", char::from(other)));
                        }
                        None => break,
                    };
                    value.push(escaped);
                }
                b'\n' => return Err("newline in quoted string".to_string()),
                _ => value.push(byte),
            }
        }

        Err("unterminated quoted string".to_string())
    }

    fn raw(&mut self) -> std::result::Result<Token, String> {
        let body = &self.rest()[1..];
        let end = body
            .iter()
            .position(|&byte| byte == b'`')
            .ok_or("unterminated raw string")?;
        self.pos += 1 + end + 1;
        Ok(Token::Str(body[..end].to_vec()))
    }
}

/// One entry of the in-progress include chain.
///
/// Frames live on the call stack of the renderer and point at their parent,
/// so each recursive call sees an immutable view of the chain above it.
#[derive(Debug, Clone, Copy)]
pub struct IncludeFrame<'a> {
    path: &'a Path,
    parent: Option<&'a IncludeFrame<'a>>,
}

impl<'a> IncludeFrame<'a> {
    /// Paths from this frame up to the top-level template.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::successors(Some(self), |frame| frame.parent).map(|frame| frame.path)
    }

    /// Whether `path` is already being rendered.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths().any(|active| active == path)
    }

    /// The chain from the top-level template down to this frame.
    #[must_use]
    pub fn chain(&self) -> Vec<PathBuf> {
        let mut chain: Vec<PathBuf> = self.paths().map(Path::to_path_buf).collect();
        chain.reverse();
        chain
    }
}

/// Renders templates from a source tree against an asset manifest.
#[derive(Debug, Clone)]
pub struct TemplateRenderer<'m> {
    source_root: PathBuf,
    manifest: &'m AssetManifest,
}

impl<'m> TemplateRenderer<'m> {
    /// Create a renderer confined to `source_root`.
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, manifest: &'m AssetManifest) -> Self {
        Self {
            source_root: source_root.into(),
            manifest,
        }
    }

    /// Render a top-level template to bytes.
    pub fn render(&self, template: &Path) -> Result<Vec<u8>> {
        self.render_frame(template, None)
    }

    fn render_frame(&self, template: &Path, parent: Option<&IncludeFrame<'_>>) -> Result<Vec<u8>> {
        let path = pathsafe::absolutize(template).map_err(|source| TemplateError::Resolve {
            path: template.to_path_buf(),
            source,
        })?;

        if !pathsafe::is_within_root(&self.source_root, &path) {
            return Err(TemplateError::OutsideRoot { path });
        }

        if let Some(parent) = parent {
            if parent.contains(&path) {
                let mut chain = parent.chain();
                chain.push(path);
                return Err(TemplateError::Cycle { chain });
            }
        }

        let content = fs::read(&path).map_err(|source| TemplateError::Read {
            path: path.clone(),
            source,
        })?;
        let template = Template::parse(path.display().to_string(), &content)?;

        let frame = IncludeFrame {
            path: &path,
            parent,
        };

        let mut rendered = Vec::with_capacity(content.len());
        for node in template.nodes() {
            match node {
                Node::Text(text) => rendered.extend_from_slice(text),
                Node::Include { path: include, .. } => {
                    let target = self.resolve_include(&path, include)?;
                    trace!(from = %path.display(), include = %target.display(), "rendering include");
                    rendered.extend_from_slice(&self.render_frame(&target, Some(&frame))?);
                }
                Node::Asset { name, .. } => {
                    rendered.extend_from_slice(self.lookup_asset(&path, name)?.as_bytes());
                }
            }
        }

        Ok(rendered)
    }

    fn resolve_include(&self, current: &Path, include: &str) -> Result<PathBuf> {
        if include.is_empty() {
            return Err(TemplateError::EmptyInclude {
                template: current.to_path_buf(),
            });
        }

        let directory = current.parent().unwrap_or(&self.source_root);
        let joined = directory.join(include.trim_start_matches('/'));
        let resolved = pathsafe::absolutize(&joined).map_err(|source| TemplateError::Resolve {
            path: joined.clone(),
            source,
        })?;

        if !pathsafe::is_within_root(&self.source_root, &resolved) {
            return Err(TemplateError::IncludeOutsideRoot {
                include: include.to_string(),
                template: current.to_path_buf(),
            });
        }

        pathsafe::ensure_no_symlink_traversal(&self.source_root, &resolved).map_err(|source| {
            TemplateError::IncludeSymlink {
                include: include.to_string(),
                template: current.to_path_buf(),
                source,
            }
        })?;

        let metadata = fs::metadata(&resolved).map_err(|source| TemplateError::IncludeMissing {
            include: include.to_string(),
            template: current.to_path_buf(),
            source,
        })?;
        if metadata.is_dir() {
            return Err(TemplateError::IncludeDirectory {
                include: include.to_string(),
                template: current.to_path_buf(),
            });
        }

        Ok(resolved)
    }

    fn lookup_asset(&self, current: &Path, name: &str) -> Result<&'m str> {
        if name.trim().is_empty() {
            return Err(TemplateError::EmptyAsset {
                template: current.to_path_buf(),
            });
        }

        self.manifest
            .get(name)
            .ok_or_else(|| TemplateError::UnknownAsset {
                name: name.to_string(),
                template: current.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn parse(source: &str) -> Vec<Node> {
        Template::parse("test", source).unwrap().nodes().to_vec()
    }

    fn syntax_error(source: impl AsRef<[u8]>) -> (usize, String) {
        match Template::parse("test", source) {
            Err(TemplateError::Syntax { line, message, .. }) => (line, message),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    fn text(value: &str) -> Node {
        Node::Text(value.as_bytes().to_vec())
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(parse("<h1>Hello</h1>"), vec![text("<h1>Hello</h1>")]);
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_parse_directives() {
        let nodes = parse("<main>{{ render \"./header.html\" }}</main>\n<link href='{{asset `style.css`}}'>");
        assert_eq!(
            nodes,
            vec![
                text("<main>"),
                Node::Include {
                    path: "./header.html".to_string(),
                    line: 1
                },
                text("</main>\n<link href='"),
                Node::Asset {
                    name: "style.css".to_string(),
                    line: 2
                },
                text("'>"),
            ]
        );
    }

    #[test]
    fn test_parse_string_literal_and_comment() {
        assert_eq!(
            parse("a{{/* hidden */}}b{{ \"{{\" }}c"),
            vec![text("ab{{c")]
        );
        assert_eq!(parse("{{ \"say \\\"hi\\\"\\n\" }}"), vec![text("say \"hi\"\n")]);
    }

    #[test]
    fn test_parse_trim_markers() {
        assert_eq!(
            parse("<ul>\n  {{- asset \"a.css\" -}}\n</ul>"),
            vec![
                text("<ul>"),
                Node::Asset {
                    name: "a.css".to_string(),
                    line: 2
                },
                text("</ul>"),
            ]
        );
        // A minus without surrounding space is not a trim marker.
        let (_, message) = syntax_error("{{-asset \"a.css\"}}");
        assert!(message.contains("unexpected '-'"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(syntax_error("one\ntwo {{ render \"x\"").0, 2);
        assert!(syntax_error("{{ render \"x\"").1.contains("unclosed action"));
        assert!(syntax_error("{{ }}").1.contains("missing directive"));
        assert!(syntax_error("{{ title }}").1.contains("expects exactly one string"));
        assert!(syntax_error("{{ include \"a.html\" }}").1.contains("not defined"));
        assert!(syntax_error("{{ asset \"a\" \"b\" }}").1.contains("exactly one"));
        assert!(syntax_error("{{ asset \"a }}").1.contains("unterminated"));
        assert!(syntax_error("{{ asset 42 }}").1.contains("unexpected '4'"));
        assert!(syntax_error("{{/* open }}").1.contains("unclosed comment"));
    }

    #[test]
    fn test_parse_comment_must_fill_action() {
        assert_eq!(parse("a{{- /* x */ -}} b"), vec![text("ab")]);

        let (_, message) = syntax_error("{{ render /* x */ \"a.html\" }}");
        assert!(message.contains("unexpected '/'"));
        let (_, message) = syntax_error("{{ /* x */ }}");
        assert!(message.contains("unexpected '/'"));
        let (_, message) = syntax_error("{{/* x */ render \"a.html\" }}");
        assert!(message.contains("comment ends before closing delimiter"));
    }

    #[test]
    fn test_parse_keeps_non_utf8_text() {
        let template = Template::parse("latin1", b"<p>caf\xe9</p>{{ asset \"a.css\" }}\xff").unwrap();
        assert_eq!(
            template.nodes().to_vec(),
            vec![
                Node::Text(b"<p>caf\xe9</p>".to_vec()),
                Node::Asset {
                    name: "a.css".to_string(),
                    line: 1
                },
                Node::Text(vec![0xff]),
            ]
        );

        let (_, message) = syntax_error(b"{{ render \"caf\xe9.html\" }}");
        assert!(message.contains("not valid UTF-8"));
    }

    #[test]
    fn test_parse_error_line_after_multiline_action() {
        let (line, _) = syntax_error("{{/* one\ntwo */}}\n{{ nope }}");
        assert_eq!(line, 3);
    }

    #[test]
    fn test_include_frame_chain() {
        let a = IncludeFrame {
            path: Path::new("/src/a.html"),
            parent: None,
        };
        let b = IncludeFrame {
            path: Path::new("/src/b.html"),
            parent: Some(&a),
        };

        assert!(b.contains(Path::new("/src/a.html")));
        assert!(!a.contains(Path::new("/src/b.html")));
        assert_eq!(
            b.chain(),
            vec![PathBuf::from("/src/a.html"), PathBuf::from("/src/b.html")]
        );
    }

    #[test]
    fn test_render_includes_relative_to_including_template() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("index.html"), "<body>{{ render \"partials/layout.html\" }}</body>");
        write(&root.join("partials/layout.html"), "<main>{{ render \"nav.html\" }}</main>");
        write(&root.join("partials/nav.html"), "<nav>menu</nav>");
        // Same name at the root must not be picked up.
        write(&root.join("nav.html"), "wrong");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(root, &manifest);
        let rendered = renderer.render(&root.join("index.html")).unwrap();

        assert_eq!(rendered, b"<body><main><nav>menu</nav></main></body>");
    }

    #[test]
    fn test_render_passes_non_utf8_bytes_through() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("index.html"), b"<p>caf\xe9</p>{{ render \"foot.html\" }}").unwrap();
        fs::write(root.join("foot.html"), b"<footer>\xa9 2024</footer>").unwrap();

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(root, &manifest);
        let rendered = renderer.render(&root.join("index.html")).unwrap();

        assert_eq!(rendered, b"<p>caf\xe9</p><footer>\xa9 2024</footer>");
    }

    #[test]
    fn test_render_uses_manifest_output_path() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("index.html"), "<link href=\"/{{ asset \"style.css\" }}\">");

        let mut manifest = AssetManifest::new();
        manifest.add("style.css", "style.3f2a.css");
        let renderer = TemplateRenderer::new(dir.path(), &manifest);

        let rendered = renderer.render(&dir.path().join("index.html")).unwrap();
        assert_eq!(rendered, b"<link href=\"/style.3f2a.css\">");
    }

    #[test]
    fn test_render_rejects_unknown_and_blank_assets() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("missing.html"), "{{ asset \"missing.css\" }}");
        write(&dir.path().join("blank.html"), "{{ asset \"  \" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(dir.path(), &manifest);

        let err = renderer.render(&dir.path().join("missing.html")).unwrap_err();
        assert!(err.to_string().contains("not found in manifest"));

        let err = renderer.render(&dir.path().join("blank.html")).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyAsset { .. }));
    }

    #[test]
    fn test_render_detects_cycle() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("a.html"), "A{{ render \"./b.html\" }}");
        write(&root.join("b.html"), "B{{ render \"a.html\" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(root, &manifest);
        let err = renderer.render(&root.join("a.html")).unwrap_err();

        let TemplateError::Cycle { chain } = &err else {
            panic!("expected cycle error, got {err:?}");
        };
        let names: Vec<_> = chain
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.html", "b.html", "a.html"]);
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_render_detects_self_include() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("self.html"), "{{ render \"self.html\" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(dir.path(), &manifest);
        let err = renderer.render(&dir.path().join("self.html")).unwrap_err();
        assert!(matches!(err, TemplateError::Cycle { .. }));
    }

    #[test]
    fn test_render_allows_repeated_non_cyclic_include() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(&root.join("page.html"), "{{ render \"hr.html\" }}|{{ render \"hr.html\" }}");
        write(&root.join("hr.html"), "<hr>");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(root, &manifest);
        assert_eq!(renderer.render(&root.join("page.html")).unwrap(), b"<hr>|<hr>");
    }

    #[test]
    fn test_render_rejects_include_outside_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        write(&dir.path().join("secret.html"), "secret");
        write(&root.join("index.html"), "{{ render \"../secret.html\" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(&root, &manifest);
        let err = renderer.render(&root.join("index.html")).unwrap_err();
        assert!(err.to_string().contains("outside source root"));
    }

    #[test]
    fn test_render_rejects_template_outside_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(&root).unwrap();
        write(&dir.path().join("other.html"), "other");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(&root, &manifest);
        let err = renderer.render(&dir.path().join("other.html")).unwrap_err();
        assert!(matches!(err, TemplateError::OutsideRoot { .. }));
    }

    #[test]
    fn test_render_rejects_missing_and_directory_includes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("partials")).unwrap();
        write(&root.join("missing.html"), "{{ render \"nope.html\" }}");
        write(&root.join("dir.html"), "{{ render \"partials\" }}");
        write(&root.join("empty.html"), "{{ render \"\" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(root, &manifest);

        assert!(matches!(
            renderer.render(&root.join("missing.html")),
            Err(TemplateError::IncludeMissing { .. })
        ));
        assert!(matches!(
            renderer.render(&root.join("dir.html")),
            Err(TemplateError::IncludeDirectory { .. })
        ));
        assert!(matches!(
            renderer.render(&root.join("empty.html")),
            Err(TemplateError::EmptyInclude { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_render_rejects_symlinked_include() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        write(&dir.path().join("secret.html"), "secret");
        fs::create_dir_all(root.join("partials")).unwrap();
        std::os::unix::fs::symlink("../../secret.html", root.join("partials/link.html")).unwrap();
        write(&root.join("index.html"), "{{ render \"./partials/link.html\" }}");

        let manifest = AssetManifest::new();
        let renderer = TemplateRenderer::new(&root, &manifest);
        let err = renderer.render(&root.join("index.html")).unwrap_err();
        assert!(err.to_string().contains("symlink traversal"));
    }
}
