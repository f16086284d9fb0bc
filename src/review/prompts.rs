//! Prompt text for section generation.

use super::Section;

/// Writing instructions specific to one section.
pub fn section_instructions(section: Section) -> &'static str {
    match section {
        Section::Background => {
            "Write the Background section of the review.\n\
             1. Introduce the topic and explain why it matters for research and practice.\n\
             2. Summarise what the existing literature already establishes and where it disagrees.\n\
             3. Justify the review: state the gap it addresses and frame the question using the \
             Population, Intervention, Comparison, and Outcome elements where they apply."
        }
        Section::Methods => {
            "Write the Methods section of the review.\n\
             1. Describe the study design and how the PRISMA process shaped searching, screening, \
             and selection.\n\
             2. Explain how evidence was extracted and synthesised across studies.\n\
             3. State the inclusion and exclusion rationale.\n\
             4. Note the strengths and limitations of the approach.\n\
             5. Close with the methodological points a reader needs to interpret the results."
        }
        Section::Results => {
            "Write the Results section of the review.\n\
             1. Summarise the body of evidence that was included.\n\
             2. Describe the types of studies and their populations.\n\
             3. Report the key findings, with effect sizes or figures where the context gives them.\n\
             4. Point out gaps and inconsistencies in the evidence."
        }
        Section::Discussion => {
            "Write the Discussion section of the review.\n\
             1. Restate the main findings in plain terms.\n\
             2. Interpret them against prior work and plausible mechanisms.\n\
             3. Weigh the strengths and limitations of the evidence and of this review.\n\
             4. Propose concrete directions for future research."
        }
        Section::Conclusion => {
            "Write the Conclusion section of the review.\n\
             1. Summarise the key findings in a few sentences.\n\
             2. State the implications for clinical practice and public health.\n\
             3. Give final recommendations."
        }
    }
}

/// Assemble generation context: every non-empty previous section, then up to `chunk_budget`
/// retrieved chunks, separated by blank lines. Empty when both inputs are empty.
pub fn build_context(retrieved: &[String], previous_sections: &[String], chunk_budget: usize) -> String {
    let research = retrieved
        .iter()
        .take(chunk_budget)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");
    let previous = previous_sections
        .iter()
        .map(String::as_str)
        .filter(|section| !section.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if previous.is_empty() {
        research
    } else {
        format!("{previous}\n\n{research}")
    }
}

/// Full prompt for one section.
pub fn section_prompt(
    section: Section,
    query: &str,
    context: &str,
    instructions: &str,
    target_words: usize,
) -> String {
    format!(
        "# Systematic Review Writing Task: {section}\n\n\
         You are an experienced researcher writing a systematic review that follows the PRISMA \
         guidelines. Write the {section} section in a structured, evidence-based, academic style.\n\n\
         ## Writing guidelines\n\
         - Keep the process transparent and reproducible, as PRISMA requires.\n\
         - Use formal academic language that stays consistent with the sections already written.\n\
         - Open with a sentence that connects to the previous section.\n\
         - Summarise instead of repeating points made elsewhere.\n\n\
         ## Context\n\
         The review question comes first, followed by the sections written so far and the \
         retrieved research excerpts.\n\n\
         ```\n{query}\n```\n\n\
         ```\n{context}\n```\n\n\
         ## Section instructions\n\
         {instructions}\n\n\
         - Treat the context as the reference for facts and terminology.\n\
         - When earlier sections describe methods or findings, stay aligned with them.\n\n\
         ## Output constraints\n\
         - Format: use headings and subheadings where they help.\n\
         - Word Limit: Aim for {target_words} words, keeping the essential details.\n\
         - Keep the text readable and logically consistent.\n\n\
         Now write the complete {section} section:\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn context_prefixes_previous_sections_and_respects_budget() {
        let retrieved = strings(&["r1", "r2", "r3"]);
        let previous = strings(&["background text", "methods text"]);
        let context = build_context(&retrieved, &previous, 2);
        assert_eq!(context, "background text\n\nmethods text\n\nr1\n\nr2");
    }

    #[test]
    fn empty_previous_entries_add_no_blank_blocks() {
        let previous = strings(&["", "methods text"]);
        let context = build_context(&strings(&["r1"]), &previous, 30);
        assert_eq!(context, "methods text

r1");
    }

    #[test]
    fn empty_inputs_give_empty_context() {
        assert_eq!(build_context(&[], &[], 30), "");
        assert_eq!(build_context(&strings(&["r1"]), &[], 0), "");
    }

    #[test]
    fn prompt_carries_task_query_and_word_target() {
        let prompt = section_prompt(
            Section::Results,
            "Does vitamin D prevent fractures?",
            "ctx",
            section_instructions(Section::Results),
            Section::Results.target_words(),
        );
        assert!(prompt.starts_with("# Systematic Review Writing Task: Results"));
        assert!(prompt.contains("Does vitamin D prevent fractures?"));
        assert!(prompt.contains("Aim for 2500 words"));
        assert!(prompt.contains("Write the Results section of the review."));
    }
}
