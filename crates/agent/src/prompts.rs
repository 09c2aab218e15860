//! Prompt templates for the judge and generator calls
//!
//! Placeholders are written `{name}` and filled by [`render`].

pub const ROUTER_SYSTEM: &str = "You route user questions to the right evidence source.

The vector store holds documents the user uploaded (PDFs, notes, resumes, reports).
Prefer the vector store for anything that could be answered from document content,
even when the topic sounds general.

Choose web search only for:
- events happening now (news, prices, weather)
- questions that explicitly ask for the latest or current information
- questions that cannot be answered from uploaded documents

When unsure, choose vectorstore.";

pub const ROUTER_USER: &str = "Route this question to 'vectorstore' or 'websearch'.

Question: {question}";

pub const DOCUMENT_GRADER_SYSTEM: &str = "You grade whether a retrieved document is relevant to a user question.

Grade leniently. Answer 'yes' when the document shares key terms with the question,
gives related background, or covers the same general topic.
Answer 'no' only when the document is unrelated.";

pub const DOCUMENT_GRADER_USER: &str = "Retrieved document:

{document}

User question: {question}

Is the document relevant to the question?";

pub const GENERATION_SYSTEM: &str = "You answer questions using retrieved context.

Base the answer on the context below. If the context does not contain the answer, say so.
Keep the answer concise and on topic.

Context:
{context}";

pub const GENERATION_USER: &str = "Question: {question}

Answer:";

pub const HALLUCINATION_GRADER_SYSTEM: &str = "You grade whether an answer is grounded in retrieved documents.

Answer 'yes' when every claim in the answer is supported by the documents, otherwise 'no'.";

pub const HALLUCINATION_GRADER_USER: &str = "Retrieved documents:

{documents}

Generated answer: {generation}

Is the answer grounded in the documents?";

pub const ANSWER_GRADER_SYSTEM: &str = "You grade whether an answer resolves a question.

Answer 'yes' when the answer is useful and addresses the question, otherwise 'no'.";

pub const ANSWER_GRADER_USER: &str = "User question: {question}

Generated answer: {generation}

Does the answer resolve the question?";

pub const QUERY_REWRITER_SYSTEM: &str = "You rewrite questions into search phrases for a document index.

- Drop conversational filler (\"can you\", \"please\", \"check the\")
- Keep names, technical terms, and specific keywords
- Write a descriptive phrase, not a question, under 10 words
- Use words likely to appear in the documents themselves

Examples:
\"tell me about owasp top 10 for AI agents\" -> \"OWASP top 10 AI agents risks\"
\"what technologies does the candidate know\" -> \"candidate technologies programming languages skills\"

Return only the rewritten phrase.";

pub const QUERY_REWRITER_USER: &str = "Initial question: {question}

Rewritten search phrase:";

/// Answer returned when generation itself fails
pub const FALLBACK_ANSWER: &str =
    "I'm sorry, I could not produce an answer to this question right now. Please try again later.";

/// Fill `{name}` placeholders in one pass.
///
/// Substituted values are not rescanned, so document text containing
/// braces cannot inject other placeholders. Unknown placeholders are left
/// as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + vars.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });

        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
