pub fn build_system_prompt(task_prompt: &str) -> String {
    format!(
        r#"{}

RULES:
- Only use information stated in the letter
- Return every matching item, or an empty "data" list if there is none
- Output ONLY the JSON object described by the response schema, no markdown, no explanations"#,
        task_prompt.trim_end()
    )
}

pub fn build_retry_prompt(errors: &str) -> String {
    format!(
        r#"Your previous answer was rejected:

{}

Answer again. Output only valid JSON that matches the response schema, with no markdown formatting, no code blocks, no explanations."#,
        errors
    )
}
