//! XML manifest patcher
//!
//! Parses XML into a generic tagged tree (element name, ordered attributes,
//! character data, ordered children) so documents without a known schema
//! can be patched. The version attribute is overwritten in place by index,
//! which preserves attribute declaration order. Re-serialization uses a
//! 2-space indent; prolog and comments are not round-tripped.
//!
//! Attribute names come from the rule's extraction settings when present,
//! otherwise from generic defaults (`id`/`version`). For NuGet/.NET rules
//! without extraction settings the defaults are `Include`/`Version`, and
//! `ItemGroup/PackageReference` nodes are always swept in addition to the
//! configured fields.

use crate::config::RuleConfig;
use crate::domain::Package;
use crate::error::FormatError;
use crate::formats::FormatUpdater;

/// A single XML attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttr {
    pub name: String,
    pub value: String,
}

/// A generic XML element node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Element name
    pub name: String,
    /// Attributes in declaration order
    pub attrs: Vec<XmlAttr>,
    /// Concatenated character data directly inside this element
    pub text: String,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Returns the value of a named attribute
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Overwrites a named attribute in place, preserving declaration order
    pub fn set_attr(&mut self, name: &str, value: &str) -> bool {
        for attr in self.attrs.iter_mut() {
            if attr.name == name {
                attr.value = value.to_string();
                return true;
            }
        }
        false
    }
}

/// Finds mutable nodes under `root` following a slash-separated path of
/// element names (e.g. "ItemGroup/PackageReference" matches grandchildren
/// of the root).
pub fn find_nodes_mut<'a>(root: &'a mut XmlNode, path: &str) -> Vec<&'a mut XmlNode> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let mut current: Vec<&'a mut XmlNode> = vec![root];
    for part in parts {
        let mut next = Vec::new();
        for node in current {
            for child in node.children.iter_mut() {
                if child.name == part {
                    next.push(child);
                }
            }
        }
        current = next;
    }
    current
}

/// Parses XML bytes into a node tree rooted at the document element
pub fn parse_xml(content: &[u8]) -> Result<XmlNode, FormatError> {
    let text = std::str::from_utf8(content).map_err(|e| FormatError::Xml {
        message: e.to_string(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Parser { input: text, pos: 0 }.parse_document()
}

/// Serializes a node tree with 2-space indentation and no trailing newline
pub fn to_indented_xml(root: &XmlNode) -> Vec<u8> {
    let mut out = String::new();
    write_node(root, 0, &mut out);
    out.into_bytes()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::Xml {
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_until(&mut self, marker: &str) -> Result<(), FormatError> {
        match self.rest().find(marker) {
            Some(idx) => {
                self.advance(idx + marker.len());
                Ok(())
            }
            None => Err(self.error(format!("unterminated construct, expected {marker}"))),
        }
    }

    fn parse_document(&mut self) -> Result<XmlNode, FormatError> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.error("missing root element"));
            }
            if rest.starts_with("<?") {
                self.skip_until("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if rest.starts_with("<!") {
                self.skip_until(">")?;
            } else if rest.starts_with('<') {
                let root = self.parse_element()?;
                self.skip_whitespace();
                return Ok(root);
            } else {
                return Err(self.error("unexpected content before root element"));
            }
        }
    }

    fn parse_element(&mut self) -> Result<XmlNode, FormatError> {
        self.advance(1); // consume '<'
        let name = self.read_name()?;
        let mut node = XmlNode {
            name,
            ..Default::default()
        };

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    if !self.rest().starts_with("/>") {
                        return Err(self.error(format!("malformed tag <{}>", node.name)));
                    }
                    self.advance(2);
                    return Ok(node);
                }
                Some('>') => {
                    self.advance(1);
                    break;
                }
                Some(_) => {
                    let attr_name = self.read_name()?;
                    self.skip_whitespace();
                    if self.peek() != Some('=') {
                        return Err(self.error(format!(
                            "attribute {attr_name} missing value in <{}>",
                            node.name
                        )));
                    }
                    self.advance(1);
                    self.skip_whitespace();
                    let value = self.read_quoted_value()?;
                    node.attrs.push(XmlAttr {
                        name: attr_name,
                        value,
                    });
                }
                None => return Err(self.error(format!("unterminated tag <{}>", node.name))),
            }
        }

        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.error(format!("unclosed element <{}>", node.name)));
            }
            if let Some(after) = rest.strip_prefix("</") {
                let close_len = rest.len() - after.len();
                self.advance(close_len);
                let close_name = self.read_name()?;
                self.skip_whitespace();
                if self.peek() != Some('>') {
                    return Err(self.error(format!("malformed closing tag </{close_name}>")));
                }
                self.advance(1);
                if close_name != node.name {
                    return Err(self.error(format!(
                        "mismatched closing tag: expected </{}>, found </{close_name}>",
                        node.name
                    )));
                }
                return Ok(node);
            }
            if rest.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if rest.starts_with("<![CDATA[") {
                self.advance("<![CDATA[".len());
                let end = self
                    .rest()
                    .find("]]>")
                    .ok_or_else(|| self.error("unterminated CDATA section"))?;
                node.text.push_str(&self.rest()[..end]);
                self.advance(end + "]]>".len());
            } else if rest.starts_with("<?") {
                self.skip_until("?>")?;
            } else if rest.starts_with('<') {
                node.children.push(self.parse_element()?);
            } else {
                let end = self.rest().find('<').unwrap_or(self.rest().len());
                node.text.push_str(&decode_entities(&self.rest()[..end]));
                self.advance(end);
            }
        }
    }

    fn read_name(&mut self) -> Result<String, FormatError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '=' | '<'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected a name"));
        }
        let name = rest[..end].to_string();
        self.advance(end);
        Ok(name)
    }

    fn read_quoted_value(&mut self) -> Result<String, FormatError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("attribute value must be quoted")),
        };
        self.advance(1);
        let end = self
            .rest()
            .find(quote)
            .ok_or_else(|| self.error("unterminated attribute value"))?;
        let value = decode_entities(&self.rest()[..end]);
        self.advance(end + 1);
        Ok(value)
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        result.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let Some(end) = rest.find(';') else {
            result.push_str(rest);
            return result;
        };
        let entity = &rest[1..end];
        match entity {
            "amp" => result.push('&'),
            "lt" => result.push('<'),
            "gt" => result.push('>'),
            "quot" => result.push('"'),
            "apos" => result.push('\''),
            _ => {
                let decoded = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => result.push(ch),
                    None => result.push_str(&rest[..=end]),
                }
            }
        }
        rest = &rest[end + 1..];
    }
    result.push_str(rest);
    result
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

fn write_node(node: &XmlNode, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    let text = node.text.trim();

    out.push_str(&pad);
    out.push('<');
    out.push_str(&node.name);
    for attr in &node.attrs {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape_attr(&attr.value));
        out.push('"');
    }

    if node.children.is_empty() && text.is_empty() {
        out.push_str(" />");
        return;
    }
    out.push('>');

    if node.children.is_empty() {
        out.push_str(&escape_text(text));
        out.push_str("</");
        out.push_str(&node.name);
        out.push('>');
        return;
    }

    if !text.is_empty() {
        out.push('\n');
        out.push_str(&"  ".repeat(depth + 1));
        out.push_str(&escape_text(text));
    }
    for child in &node.children {
        out.push('\n');
        write_node(child, depth + 1, out);
    }
    out.push('\n');
    out.push_str(&pad);
    out.push_str("</");
    out.push_str(&node.name);
    out.push('>');
}

/// Updater for XML manifests (.csproj, packages.config, ...)
#[derive(Debug)]
pub struct XmlUpdater;

impl FormatUpdater for XmlUpdater {
    fn update_version(
        &self,
        content: &[u8],
        package: &Package,
        rule: &RuleConfig,
        target: &str,
    ) -> Result<Vec<u8>, FormatError> {
        let mut root = parse_xml(content)?;
        let version_value = format!("{}{}", package.constraint, target);
        let is_dotnet = matches!(rule.manager.as_str(), "nuget" | "dotnet");
        let mut updated = false;

        for field in rule.fields.keys() {
            let mut name_attr = "id";
            let mut version_attr = "version";
            let mut path = field.as_str();

            if let Some(extraction) = &rule.extraction {
                if let Some(extraction_path) = extraction.path.as_deref() {
                    if !extraction_path.is_empty() {
                        path = extraction_path;
                    }
                }
                if let Some(attr) = extraction.name_attr.as_deref() {
                    name_attr = attr;
                }
                if let Some(attr) = extraction.version_attr.as_deref() {
                    version_attr = attr;
                }
            } else if is_dotnet {
                name_attr = "Include";
                version_attr = "Version";
            }

            let nodes = find_nodes_mut(&mut root, path);
            updated |= update_matching(nodes, name_attr, version_attr, &package.name, &version_value);
        }

        if is_dotnet {
            let refs = find_nodes_mut(&mut root, "ItemGroup/PackageReference");
            updated |= update_matching(refs, "Include", "Version", &package.name, &version_value);
        }

        if !updated {
            return Err(FormatError::PackageNotFound {
                package: package.name.clone(),
                manifest: package.source.display().to_string(),
            });
        }

        Ok(to_indented_xml(&root))
    }
}

fn update_matching(
    nodes: Vec<&mut XmlNode>,
    name_attr: &str,
    version_attr: &str,
    package: &str,
    version_value: &str,
) -> bool {
    let mut updated = false;
    for node in nodes {
        if node.get_attr(name_attr) != Some(package) {
            continue;
        }
        if node.set_attr(version_attr, version_value) {
            updated = true;
        }
    }
    updated
}
