// Shared prompt fragments used by every Box AI request.
// Each feature that calls Box AI keeps its own prompts.rs alongside it;
// this file holds the cross-cutting pieces.

/// Role preamble placed at the top of every request.
pub const EXPERT_PREAMBLE: &str = "You are an expert in document template conversion \
    between Conga Composer and Box Doc Gen.";

/// Appended to requests whose answer is machine-parsed as CSV.
pub const CSV_ONLY_INSTRUCTION: &str = "\
    Respond with the CSV data ONLY. \
    Do NOT wrap it in markdown code fences. \
    Do NOT add explanations before or after the table. \
    Quote any value that contains a comma.";

/// Reminds the model that the attached files are the source of truth.
pub const FILE_GROUNDING_INSTRUCTION: &str = "\
    Base every mapping on the attached files. Do NOT invent objects or fields \
    that are absent from the SOQL query or the schema. If no target field fits, \
    still list the merge field with confidence low and explain why in notes.";
