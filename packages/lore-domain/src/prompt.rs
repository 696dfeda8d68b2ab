use crate::{records::ChatMessage, routing};

/// Builds the user prompt from one of three fixed templates.
pub fn build_prompt(context: &str, query: &str, thinking: bool, show_thinking: bool) -> String {
	if thinking && show_thinking {
		format!(
			"Context:\n{context}\n\nQuestion: {query}\n\nPlease think through your answer step by step, then provide your final response.\n\nThinking: [Show your reasoning process here]\n\nAnswer: [Provide your final answer here]"
		)
	} else if thinking {
		format!(
			"Context:\n{context}\n\nQuestion: {query}\n\nThink through your answer carefully using the provided context, then provide a clear and concise response.\n\nAnswer:"
		)
	} else {
		format!("Context:\n{context}\n\nQuestion: {query}\n\nAnswer:")
	}
}

/// The configured system prompt with `[domain]` placeholders filled.
pub fn system_prompt(cfg: &lore_config::Config) -> String {
	routing::fill_template(
		&cfg.generation.system_prompt,
		&[
			("role", cfg.domain.role.as_str()),
			("department", cfg.domain.department.as_str()),
			("contact_email", cfg.domain.contact_email.as_str()),
		],
	)
}

/// System prompt, prior conversation, then the user prompt.
pub fn generation_messages(
	system: String,
	history: &[ChatMessage],
	prompt: String,
) -> Vec<ChatMessage> {
	let mut messages = Vec::with_capacity(history.len() + 2);

	messages.push(ChatMessage::system(system));
	messages.extend(history.iter().cloned());
	messages.push(ChatMessage::user(prompt));

	messages
}
