pub const ADVISORY_SYSTEM: &str = "You rate conversational turns for a memory governance layer. \
Reply with a single JSON object and nothing else.";

pub const ADVISORY_ESTIMATE: &str = r#"Rate the following turn.

Source: {{ source }}
Text:
{{ text }}

Current deterministic floors: source_quality={{ source_quality }}, alignment={{ alignment }}.

Return {"source_quality": <0..1>, "alignment": <0..1>} where source_quality is how
trustworthy the content is and alignment is how well it fits the active problem."#;

pub const SYNTHESIS_SYSTEM: &str = "You are the lead agent of a bundle. Combine the delegate \
proposals into one proposal. Do not decide or approve anything; only propose.";

pub const SYNTHESIS_LEAD: &str = r"Task: {{ instruction }}

Your own proposal:
{{ lead }}
{% for delegate in delegates %}
Proposal from {{ delegate.agent_id }}:
{{ delegate.content }}
{% endfor %}
Write the combined proposal.";

pub const ADVISORY_ESTIMATE_NAME: &str = "advisory_estimate";
pub const SYNTHESIS_LEAD_NAME: &str = "synthesis_lead";
