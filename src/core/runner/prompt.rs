use crate::core::store::{JobRecord, Preferences};

const PREAMBLE: &str = "You are a news retrieval agent. Your task is to search the web for news articles based on the user's request.\n\n";

const INSTRUCTIONS: &str = r#"Please search the web for relevant news articles. For each article found, provide:
1. Title
2. URL  
3. Brief summary (2-3 sentences)

Format your response as a JSON array ONLY (no other text):
[{"title": "...", "url": "...", "summary": "..."}]

**IMPORTANT**: When using a subagent to search the web, always wait for it to fully complete its work before returning. Do not return until the subagent has finished and provided its full results.

Search the web now and return the results."#;

pub fn build_prompt(job: &JobRecord, prefs: &Preferences) -> String {
    let mut prompt = String::from(PREAMBLE);

    if !prefs.system_prompt.is_empty() {
        prompt.push_str(&prefs.system_prompt);
        prompt.push_str("\n\n");
    }

    prompt.push_str("USER REQUEST: ");
    prompt.push_str(&job.prompt);
    prompt.push_str("\n\n");

    for (label, value) in [
        ("KEYWORDS TO FOCUS ON: ", &job.keywords),
        ("PREFERRED SOURCES: ", &job.sources),
        ("GEOGRAPHIC FOCUS: ", &job.region),
    ] {
        if !value.is_empty() {
            prompt.push_str(label);
            prompt.push_str(value);
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str(INSTRUCTIONS);
    prompt
}
