//! Prompt templates for the remote adapter
//!
//! Placeholders in `{braces}` are filled with `str::replace`. Prompts that
//! expect structured output ask for bare JSON; the adapter strips code
//! fences before parsing.

/// Placeholder: {text}
pub const EXTRACT_FACTS_PROMPT: &str = r#"Split the following text into independent, self-contained facts about the user or their world.

Each fact must make sense on its own without the surrounding text. Skip greetings, filler and questions.

For each fact provide:
- content: the fact as one short sentence, written in the third person ("User ...")
- type: one of "fact", "preference", "event", "plan"
- importance: 0.0 to 1.0, how useful this is to recall weeks later

Text:
{text}

Respond with ONLY a JSON array, for example:
[{"content": "User lives in Seoul", "type": "fact", "importance": 0.7}]
Return [] if nothing is worth remembering."#;

/// Placeholders: {query}, {context}
pub const EVOLVE_QUERY_PROMPT: &str = r#"Rewrite the search query below into a concrete query for a memory search.
Resolve pronouns and vague references using the recent conversation. Keep the user's intent.

Recent conversation:
{context}

Query: {query}

Respond with ONLY the rewritten query."#;

/// Placeholders: {query}, {items}, {summaries}
pub const REASON_PROMPT: &str = r#"Answer the query using only the memories below.

Query: {query}

Memories:
{items}

Category summaries:
{summaries}

If the memories do not contain the answer, say so plainly."#;

/// Placeholders: {fact}, {candidates}
pub const SUGGEST_CATEGORY_PROMPT: &str = r#"Choose a category path for this fact.

Fact: {fact}

Existing categories:
{candidates}

Rules:
1. Reuse an existing category when it fits well.
2. Extend an existing category with a more specific segment when needed, e.g. "knowledge/coding" -> "knowledge/coding/rust".
3. Otherwise start a new path under one of: knowledge/, personal/, projects/, preferences/.
4. Lowercase English, segments separated by "/".

Respond with ONLY the category path."#;

/// Placeholders: {path}, {items}
pub const SUMMARIZE_CATEGORY_PROMPT: &str = r#"Write a 2-3 sentence summary of the memories filed under "{path}".
Capture the main themes and the most important facts.

Memories:
{items}

Respond with ONLY the summary."#;

/// Placeholder: {content}
pub const RATE_IMPORTANCE_PROMPT: &str = r#"Rate how important it is to remember this fact long-term, from 1 (trivial) to 10 (essential).

Fact: {content}

Respond with ONLY the number."#;

/// Placeholders: {new}, {old}
pub const RELATIONSHIP_PROMPT: &str = r#"Compare a new fact with an existing one.

Existing fact: {old}
New fact: {new}

Answer with exactly one word:
UPDATE - the new fact corrects or replaces the existing fact
ADD - both facts can be true at the same time
UNRELATED - the facts are about different things"#;

/// Placeholder: {text}
pub const EXTRACT_TRIPLES_PROMPT: &str = r#"Extract atomic subject-predicate-object triples from the text.
Use short lowercase predicates with underscores (e.g. "likes", "resides_in", "works_at").
Use "user" as the subject for facts about the user.

Text:
{text}

Respond with ONLY a JSON array, for example:
[{"subject": "user", "predicate": "likes", "object": "coffee", "context": "in the morning"}]"#;

/// Placeholders: {context}, {patterns}
pub const PREDICT_INTENT_PROMPT: &str = r#"Predict what the user is likely to need next.

Current context:
{context}

Recent patterns:
{patterns}

Respond with 1-2 sentences of actionable context that would help assist the user proactively."#;

/// Placeholder: {transcript}
pub const ENDURING_FACTS_PROMPT: &str = r#"Read the conversation and list the facts worth remembering permanently:
stable facts about the user, their preferences, decisions, plans and relationships.
Ignore small talk and anything only relevant to this conversation.

Conversation:
{transcript}

Respond with one fact per line. If nothing is worth keeping, respond with exactly: NONE"#;

/// Placeholder: {text}
pub const PROFILE_INSIGHTS_PROMPT: &str = r#"Identify observations about the user's personality, habits, values or long-term preferences.

Text:
{text}

For each insight give:
- content: the insight as one sentence
- confidence: 0.0 to 1.0
- evidence_count: how many separate statements in the text support it

Respond with ONLY a JSON array, for example:
[{"content": "User prefers working late at night", "confidence": 0.7, "evidence_count": 2}]
Return [] if there are none."#;

/// Placeholders: {date}, {items}
pub const DAILY_REFLECTION_PROMPT: &str = r#"Write a daily reflection for {date} from these memories:
{items}

Respond with ONLY a JSON object:
{"summary": "1-2 sentences on what mattered most", "key_events": ["3-5 notable events"], "sentiment": "positive | neutral | negative", "insights": "1-2 sentences on patterns or discoveries"}"#;

/// Placeholders: {week}, {items}
pub const WEEKLY_SUMMARY_PROMPT: &str = r#"Write a weekly summary for {week} from these daily reflections:
{items}

Respond with ONLY a JSON object:
{"summary": "2-3 sentences", "themes": ["3-5 themes"], "patterns": "recurring behaviours", "achievements": ["milestones"], "advice": "1-2 sentences for next week"}"#;

/// Placeholders: {month}, {items}
pub const MONTHLY_SUMMARY_PROMPT: &str = r#"Write a monthly summary for {month} from these weekly summaries:
{items}

Respond with ONLY a JSON object:
{"summary": "3-4 sentences", "keywords": ["5-7 keywords"], "trends": "long-term trends", "growth": "personal growth", "goals": ["2-3 goals for next month"]}"#;

/// Render a list as `- item` lines, or a placeholder line when empty
pub fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
