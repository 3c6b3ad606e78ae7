use roundtable_models::{AgentSpec, Phase};

/// Structured block every agent may append to its reply.
fn response_schema() -> String {
    let example = serde_json::json!({
        "belief": {
            "direction": "LONG | SHORT | WAIT",
            "confidence": 0.65,
            "posteriors": {"LONG": 0.65, "SHORT": 0.2, "WAIT": 0.15}
        },
        "relation": {"type": "attack | support", "target": "<agent name>", "target_turn": 1},
        "tool_calls": [{"name": "<bound tool>", "arguments": {}}],
        "decision": {
            "consensus": false,
            "signal": "BUY | SELL | HOLD",
            "direction": "LONG | SHORT | WAIT",
            "confidence": 0.6,
            "next_speaker": "<agent name>",
            "rationale": ["<short reason>"]
        },
        "consult": ["<subagent name>"]
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

/// What a speaker is expected to do in each phase.
pub fn phase_instruction(phase: Phase) -> &'static str {
    match phase {
        Phase::Opening => {
            "OPENING: State your independent read of the context. Commit to a direction \
             and a confidence. Do not reference other panelists yet."
        }
        Phase::Discussion => {
            "DISCUSSION: Update your view in light of the transcript. Support or attack a \
             specific prior statement when you agree or disagree with it."
        }
        Phase::CrossExamination => {
            "CROSS-EXAMINATION: The panel is split. Question the strongest argument of the \
             opposing camp directly and name the statement you are challenging."
        }
        Phase::Rebuttal => {
            "REBUTTAL: Answer the challenges raised against your camp. Concede points that \
             hold and restate your direction and confidence."
        }
        Phase::Chair => {
            "CHAIR: Weigh the panel so far and publish a draft decision. Set consensus to \
             true only if the panel has clearly converged and no further round is needed."
        }
        Phase::Finalize => {
            "FINALIZE: Publish the panel's final decision. The decision block is required."
        }
        Phase::Summary => {
            "SUMMARY: Summarize the deliberation and the final decision for a reader who \
             did not follow the discussion. Do not change the decision."
        }
        Phase::History => "HISTORY: Carried over from an earlier discussion.",
    }
}

/// Substitute `{name}`, `{role}` and `{topic}` in an agent's prompt template.
pub fn render_template(agent: &AgentSpec, topic: &str) -> String {
    agent
        .prompt
        .replace("{name}", &agent.name)
        .replace("{role}", &agent.role)
        .replace("{topic}", topic)
}

pub fn agent_system_prompt(agent: &AgentSpec, phase: Phase, topic: &str) -> String {
    let mut prompt = format!(
        "You are {name}, the {role} on a trading roundtable deliberating: {topic}.\n\n\
         {template}\n\n\
         ## PHASE\n\n{instruction}\n\n",
        name = agent.name,
        role = agent.role,
        template = render_template(agent, topic),
        instruction = phase_instruction(phase),
    );

    if !agent.tools.is_empty() {
        prompt.push_str("## TOOLS\n\nYou may request these tools via `tool_calls`:\n");
        for tool in &agent.tools {
            match &tool.description {
                Some(description) => prompt.push_str(&format!("- {}: {description}\n", tool.name)),
                None => prompt.push_str(&format!("- {}\n", tool.name)),
            }
        }
        prompt.push('\n');
    }

    if !agent.subagents.is_empty() {
        prompt.push_str(&format!(
            "## CONSULTANTS\n\nYou may consult {} via `consult`.\n\n",
            agent.subagents.join(", ")
        ));
    }

    prompt.push_str(&format!(
        "## RESPONSE FORMAT\n\n\
         Reply in concise prose, then append one JSON object (all fields optional) matching:\n\
         {}\n\n\
         Confidence is a decimal between 0.0 and 1.0. Only include `decision` when your \
         phase asks for one.",
        response_schema()
    ));
    prompt
}
