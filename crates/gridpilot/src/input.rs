//! Input controller contract: the pointer/keyboard backend the executor
//! drives. Implementations wrap a platform automation layer; the engine
//! never touches the OS directly.

use async_trait::async_trait;

use crate::error::InputError;
use crate::step::PointerButton;

#[async_trait]
pub trait InputController: Send + Sync {
    /// Clicks `clicks` times at the absolute screen position.
    async fn click(
        &self,
        x: i32,
        y: i32,
        button: PointerButton,
        clicks: u32,
    ) -> Result<(), InputError>;

    /// Types the text into the focused element.
    async fn type_text(&self, text: &str) -> Result<(), InputError>;

    /// Presses a single named key (e.g. "enter", "tab").
    async fn key_press(&self, key: &str) -> Result<(), InputError>;
}
