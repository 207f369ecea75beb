// src/domain/document.rs

/// Abstract tree-node interface the path resolver evaluates against.
///
/// Decouples the path mini-language from any concrete document-tree
/// implementation; the production implementor is the quick-xml backed
/// tree in `infrastructure::xml`.
pub trait DocumentNode: Sized {
    /// Local (namespace-stripped) element name.
    fn name(&self) -> &str;

    /// Concatenated text content of the node.
    fn text(&self) -> &str;

    /// Attribute value by local name.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// All attributes in document order.
    fn attributes(&self) -> Vec<(&str, &str)> {
        Vec::new()
    }

    /// Child elements in document order.
    fn children(&self) -> Vec<&Self>;

    /// Child elements with the given local name, in document order.
    fn children_named<'a>(&'a self, name: &str) -> Vec<&'a Self> {
        self.children()
            .into_iter()
            .filter(|c| c.name() == name)
            .collect()
    }

    /// Re-renders the subtree as XML text, for the stored document snapshot.
    fn snapshot(&self) -> String {
        let mut out = String::with_capacity(128);
        out.push('<');
        out.push_str(self.name());
        for (key, value) in self.attributes() {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_xml(value));
            out.push('"');
        }
        let children = self.children();
        if self.text().is_empty() && children.is_empty() {
            out.push_str("/>");
            return out;
        }
        out.push('>');
        out.push_str(&escape_xml(self.text()));
        for child in children {
            out.push_str(&child.snapshot());
        }
        out.push_str("</");
        out.push_str(self.name());
        out.push('>');
        out
    }
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
