//! Grounding prompt construction.
//!
//! The prompt is a pure function of the code system, the description, and
//! the retrieved candidates: no randomness, no environment reads.

use codematch_shared::{CandidateSet, CodeSystem};

/// System instruction sent alongside the prompt.
pub fn system_instruction(system: CodeSystem) -> &'static str {
    match system {
        CodeSystem::Loinc => "You are a helpful clinical lab coding assistant.",
        CodeSystem::Icd10Cm => "You are a helpful clinical diagnosis coding assistant.",
    }
}

fn preamble(system: CodeSystem) -> &'static str {
    match system {
        CodeSystem::Loinc => {
            "You are a clinical lab test coding assistant. Given the LOINC test description below,\n\
             and a list of potential LOINC codes with descriptions retrieved from the knowledge store,\n\
             identify and extract the most accurate LOINC codes that correspond to the test described."
        }
        CodeSystem::Icd10Cm => {
            "You are a clinical diagnosis coding assistant. Given the diagnosis description below,\n\
             and a list of potential ICD-10-CM codes with descriptions retrieved from the knowledge store,\n\
             identify and extract the most accurate ICD-10-CM codes that correspond to the diagnosis described."
        }
    }
}

fn description_heading(system: CodeSystem) -> &'static str {
    match system {
        CodeSystem::Loinc => "LOINC Test Description:",
        CodeSystem::Icd10Cm => "ICD-10-CM Diagnosis Description:",
    }
}

/// Render the task instructions, the description, and one `code | label`
/// line per candidate in retrieval order.
pub fn build_prompt(system: CodeSystem, description: &str, candidates: &CandidateSet) -> String {
    let name = system.display_name();
    let candidate_lines = candidates
        .entries()
        .map(|(code, label)| format!("{code} | {label}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{preamble}\n\n\
         {heading}\n{description}\n\n\
         Potential {name} Codes:\n{candidate_lines}\n\n\
         Extracted {name} codes (provide the codes only, separated by commas):",
        preamble = preamble(system),
        heading = description_heading(system),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hemoglobin() -> CandidateSet {
        [
            ("1234-5", "Hemoglobin", 9.0),
            ("6789-0", "Hematocrit", 4.5),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn prompt_is_deterministic() {
        let set = hemoglobin();
        let a = build_prompt(CodeSystem::Loinc, "Hemoglobin blood g/dL", &set);
        let b = build_prompt(CodeSystem::Loinc, "Hemoglobin blood g/dL", &set);
        assert_eq!(a, b);
    }

    #[test]
    fn candidates_rendered_in_rank_order() {
        let prompt = build_prompt(CodeSystem::Loinc, "Hemoglobin blood g/dL", &hemoglobin());
        let first = prompt.find("1234-5 | Hemoglobin").expect("first");
        let second = prompt.find("6789-0 | Hematocrit").expect("second");
        assert!(first < second);
    }

    #[test]
    fn layout_sections_in_order() {
        let prompt = build_prompt(CodeSystem::Loinc, "Hemoglobin blood g/dL", &hemoglobin());

        assert!(prompt.starts_with("You are a clinical lab test coding assistant."));
        let desc = prompt
            .find("LOINC Test Description:\nHemoglobin blood g/dL")
            .unwrap();
        let list = prompt
            .find("Potential LOINC Codes:\n1234-5 | Hemoglobin")
            .unwrap();
        let close = prompt.find("provide the codes only").unwrap();
        assert!(desc < list && list < close);
        assert!(prompt.ends_with("separated by commas):"));
    }

    #[test]
    fn icd_wording() {
        let set: CandidateSet = [("E11.9", "Type 2 diabetes mellitus without complications", 5.0)]
            .into_iter()
            .collect();
        let prompt = build_prompt(CodeSystem::Icd10Cm, "diabetes type 2", &set);

        assert!(prompt.contains("ICD-10-CM Diagnosis Description:\ndiabetes type 2"));
        assert!(prompt.contains("E11.9 | Type 2 diabetes mellitus without complications"));
        assert!(prompt.contains("Extracted ICD-10-CM codes"));
        assert!(!prompt.contains("LOINC"));
    }

    #[test]
    fn repeated_code_rendered_once_with_latest_label() {
        let set: CandidateSet = [
            ("718-7", "old label", 3.0),
            ("20509-6", "calc", 2.0),
            ("718-7", "Hemoglobin [Mass/volume] in Blood", 1.0),
        ]
        .into_iter()
        .collect();
        let prompt = build_prompt(CodeSystem::Loinc, "hgb", &set);

        assert_eq!(prompt.matches("718-7 |").count(), 1);
        assert!(prompt.contains("718-7 | Hemoglobin [Mass/volume] in Blood\n20509-6 | calc"));
    }

    #[test]
    fn system_instruction_per_code_system() {
        assert!(system_instruction(CodeSystem::Loinc).contains("lab"));
        assert!(system_instruction(CodeSystem::Icd10Cm).contains("diagnosis"));
    }
}
