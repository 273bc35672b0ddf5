use pgtopo_core::Confirm;

/// Interactive yes/no prompt on the controlling terminal.
///
/// Anything but an explicit yes, including a closed terminal, counts as no.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}
