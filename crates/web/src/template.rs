//! `{{ key }}` substitution for the bundled HTML templates. Values are HTML-escaped.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template variable: {0}")]
    UnknownVariable(String),
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct Template {
    source: &'static str,
}

impl Template {
    /// Wraps template source, usually from `include_str!`.
    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }

    /// Renders the template, replacing each `{{ key }}` with its HTML-escaped value.
    ///
    /// # Arguments
    ///
    /// * `values` - `(key, value)` pairs; whitespace around keys in the template is ignored.
    ///
    /// # Returns
    ///
    /// The rendered document.
    ///
    /// # Errors
    ///
    /// Returns a `TemplateError` if:
    /// - a placeholder names a key missing from `values`,
    /// - a `{{` has no matching `}}`.
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(TemplateError::Unclosed(offset + start))?;
            let key = after[..end].trim();
            let value = values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .ok_or_else(|| TemplateError::UnknownVariable(key.to_string()))?;
            out.push_str(&escape_html(value));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Escapes the characters that are significant in HTML text and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_with_and_without_spaces() {
        let t = Template::new("<p>{{ name }}</p><i>{{name}}</i>");
        assert_eq!(
            t.render(&[("name", "hello")]).unwrap(),
            "<p>hello</p><i>hello</i>"
        );
    }

    #[test]
    fn escapes_values() {
        let t = Template::new("{{ name }}");
        assert_eq!(
            t.render(&[("name", "<b>\"Tom\" & 'Jerry'</b>")]).unwrap(),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#x27;Jerry&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let t = Template::new("{{ nope }}");
        assert_eq!(
            t.render(&[("name", "hello")]).unwrap_err(),
            TemplateError::UnknownVariable("nope".into())
        );
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        let t = Template::new("ab{{ name");
        assert_eq!(
            t.render(&[("name", "hello")]).unwrap_err(),
            TemplateError::Unclosed(2)
        );
    }
}
