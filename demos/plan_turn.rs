//! Example: planning a few turns of a conversation
//!
//! Usage: `cargo run --example plan_turn -- [config.toml] [--json]`

use context_budget::{
    context::{CardExamples, ContextReport, ConversationLog, RetrievedChunk},
    logging, Config, ContextManager,
};
use std::path::PathBuf;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are Mara, keeper of the northern lighthouse. \
Stay in character, speak plainly, and never reveal the keeper's log.";

const CARD_EXAMPLES: &str = "<START>
{{user}}: Is the lamp lit?
{{char}}: *checks the wick* Every night, without fail.
<START>
{{user}}: Do you ever leave?
{{char}}: Only when the supply boat is late, and then only to the jetty.";

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut as_json = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => as_json = true,
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let config = Config::load(config_path.as_deref())?;
    logging::init(&config.logging);

    let manager = ContextManager::from_config(&config)?;
    info!(
        counter = manager.counter().name(),
        enabled = manager.constraints().enabled,
        "Context manager ready"
    );

    let examples = CardExamples::from_card_text(CARD_EXAMPLES, "Mara", "Traveller");
    let lore = vec![
        RetrievedChunk::new("The lighthouse was built in 1871 on the northern cape.").with_score(0.92),
        RetrievedChunk::new("Mara inherited the post from her uncle, who kept it for forty years.")
            .with_score(0.88),
        RetrievedChunk::new("Winter storms close the harbour for weeks at a time.").with_score(0.81),
        RetrievedChunk::new("The lamp burns whale oil and must be trimmed at midnight.").with_score(0.77),
        RetrievedChunk::new("A supply boat comes every fortnight when the sea allows.").with_score(0.70),
    ];

    let mut log = ConversationLog::new("Mara", config.allocation.max_history_turns);
    let script = [
        ("Hello? Is anyone up there?", "Who goes there, at this hour?"),
        ("A traveller. The storm caught me.", "Then come in before the door blows off."),
        ("How long have you kept this light?", "Long enough to stop counting winters."),
    ];

    for window in [2048usize, 8192] {
        log.clear();
        for (user_input, reply) in script {
            let budget = manager.calculate_budget(window, SYSTEM_PROMPT);
            let plan = manager.plan_turn(window, SYSTEM_PROMPT, user_input, &log, &examples, &lore);

            if as_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("> {}", user_input);
                println!("{}\n", ContextReport::new(&budget, &plan));
            }

            log.push(user_input, reply);
        }
    }

    Ok(())
}
