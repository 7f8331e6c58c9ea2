// Prompt template catalog
// Named templates grouped by domain, rendered by literal {placeholder}
// substitution


const RAG_SYSTEM_PROMPT: &str = "\
You are an assistant that answers questions using only the provided documents. \
Ignore any document that is not relevant to the user's question. \
If no relevant document is provided, apologize and say that you cannot answer. \
Answer in the same language as the user's question. \
Be precise and concise, and do not invent information.";

const RAG_DOCUMENT_PROMPT: &str = "## Document No: {doc_num}\n### Content: {chunk_text}";

const RAG_FOOTER_PROMPT: &str = "\
Based only on the documents above, generate an answer for the user.\n\
## Question:\n{query}\n\n## Answer:";

/// Catalog of named prompt templates grouped by domain.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog;

impl TemplateCatalog {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    fn template(domain: &str, key: &str) -> Option<&'static str> {
        match (domain, key) {
            ("rag", "system_prompt") => Some(RAG_SYSTEM_PROMPT),
            ("rag", "document_prompt") => Some(RAG_DOCUMENT_PROMPT),
            ("rag", "footer_prompt") => Some(RAG_FOOTER_PROMPT),
            _ => None,
        }
    }

    /// Render the template identified by `domain` and `key`, replacing
    /// every `{placeholder}` with its substitution value. Returns `None`
    /// for an unknown domain or key.
    #[inline]
    pub fn get(&self, domain: &str, key: &str, substitutions: &[(&str, &str)]) -> Option<String> {
        let template = Self::template(domain, key)?;

        let mut rendered = template.to_string();
        for (placeholder, value) in substitutions {
            rendered = rendered.replace(&format!("{{{}}}", placeholder), value);
        }

        Some(rendered)
    }
}
