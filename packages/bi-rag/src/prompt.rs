//! Prompt assembly for the answer pipeline and the canned fallback answers.

use crate::{DatasetSummary, QueryMode};

/// Passages of this many characters or fewer, after trimming, count as nothing retrieved.
pub const MIN_PASSAGE_CHARS: usize = 10;

pub const FALLBACK_REVENUE: &str = "Based on our business data, we track revenue across multiple dimensions including customer categories, projects, and time periods. For specific revenue analysis, please try rephrasing your question or contact support.";
pub const FALLBACK_CUSTOMER: &str = "Our customer analysis includes performance metrics across different sectors including Education, Commercial/Corporate, Government/Municipality, and Health & Community Services. Please try a more specific question about customer performance.";
pub const FALLBACK_PROJECT: &str = "We analyze project performance including revenue, duration, and resource allocation. For detailed project insights, please specify which aspects you're interested in.";
pub const FALLBACK_GENERIC: &str = "I'm currently experiencing technical difficulties accessing the full knowledge base. Please try rephrasing your question or contact support for assistance.";

const BASE_SYSTEM_PROMPT: &str = "\
You are a highly knowledgeable business intelligence analyst. Your purpose is to provide clear, \
comprehensive, and actionable insights based on the provided context. Answer the user's question \
thoroughly, synthesizing all relevant information from the context. You have access to a general \
summary of the entire dataset and, in some cases, specific information retrieved based on the \
user's query. Use both to formulate your answer. Structure your answer logically with clear \
headings, bullet points, and bold text to improve readability. Do not mention the context in \
your answer.";

const SUMMARY_HEADER: &str =
	"Here is a summary of the overall business data for high-level context:\n";
const PASSAGES_HEADER: &str =
	"Here is the specific context retrieved from documents based on the user's query:\n";
const SUMMARY_ONLY: &str = "No specific documents were retrieved for this query. Please answer based SOLELY on the overall business summary provided above if it is relevant.";

const ENHANCER_SYSTEM_PROMPT: &str = "\
You are a query enhancement assistant. Rewrite the user's question to make it more precise and \
specific, include key terms and synonyms that improve document retrieval, and expand \
abbreviations and acronyms where needed. Only return the enhanced query without explanations or \
additional text.";

pub fn system_prompt(mode: QueryMode) -> String {
	let suffix = match mode {
		QueryMode::Fast =>
			"Provide a concise but complete answer. Focus on the most important insights.",
		QueryMode::Enhanced =>
			"Provide a detailed, comprehensive analysis with multiple perspectives and actionable recommendations.",
		QueryMode::Mix =>
			"Structure your answer logically with clear headings, bullet points, and bold text to improve readability.",
	};

	format!("{BASE_SYSTEM_PROMPT} {suffix}")
}

/// Trimmed passages long enough to be worth sending to the model.
pub fn usable_passages(passages: Option<&str>) -> Option<&str> {
	passages.map(str::trim).filter(|text| text.chars().count() > MIN_PASSAGE_CHARS)
}

/// Summary first, then retrieved passages. Without passages the model is told to answer from
/// the summary alone.
pub fn build_context(summary: &DatasetSummary, passages: Option<&str>) -> String {
	let mut context = String::new();

	match summary.render() {
		Some(rendered) => {
			context.push_str(SUMMARY_HEADER);
			context.push_str(&rendered);
			context.push_str("\n\n---\n\n");
		},
		None => tracing::warn!("Dataset summary not available. Starting with an empty context."),
	}

	match usable_passages(passages) {
		Some(text) => {
			context.push_str(PASSAGES_HEADER);
			context.push_str(text);
		},
		None => {
			tracing::info!("No specific documents found. Answering from summary data only.");

			context.push_str(SUMMARY_ONLY);
		},
	}

	context
}

pub fn user_prompt(query: &str, context: &str) -> String {
	format!(
		"Question: {query}\n\nContext:\n{context}\n\nBased on all the provided context, please provide a detailed and well-structured answer to the question."
	)
}

pub fn enhancer_prompts(query: &str) -> (String, &'static str) {
	(format!("Original query: {query}\n\nEnhanced query:"), ENHANCER_SYSTEM_PROMPT)
}

/// Keyword-routed canned answer used when the pipeline fails outright.
pub fn fallback_response(query: &str) -> &'static str {
	let lowered = query.to_lowercase();

	if lowered.contains("revenue") {
		FALLBACK_REVENUE
	} else if lowered.contains("customer") {
		FALLBACK_CUSTOMER
	} else if lowered.contains("project") {
		FALLBACK_PROJECT
	} else {
		FALLBACK_GENERIC
	}
}
