//! Fixed-length digit entry for PIN and verification-code fields
//!
//! Each field owns a [`DigitArray`]; nothing else mutates it. Typed input
//! overwrites rather than appends, backspace on an empty box deletes the digit
//! before it, and a paste is spread across the boxes from the start.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Length of a standard gate code
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Delay between the last box filling and the completion callback, so the
/// filled state renders before any submission side effect
pub const COMPLETION_DELAY: Duration = Duration::from_millis(300);

/// Callbacks from a [`DigitCodeInput`] to the rendering layer
pub trait DigitInputListener: Send + Sync {
    /// The caret should move to `index`
    fn on_focus_advance(&self, index: usize);

    /// Every box holds a digit; `code` is their concatenation
    fn on_complete(&self, code: &str);
}

/// Ordered fixed-length sequence of single digits
///
/// Every cell is either empty or one ASCII decimal digit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigitArray {
    cells: Vec<Option<char>>,
}

impl DigitArray {
    /// Create an empty array with `len` cells
    pub fn new(len: usize) -> Self {
        Self {
            cells: vec![None; len],
        }
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the array has zero cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Digit at `index`, if set
    pub fn get(&self, index: usize) -> Option<char> {
        self.cells.get(index).copied().flatten()
    }

    /// Whether every cell holds a digit
    pub fn is_complete(&self) -> bool {
        !self.cells.is_empty() && self.cells.iter().all(Option::is_some)
    }

    /// Concatenation of all cells, only when complete
    pub fn code(&self) -> Option<String> {
        if self.is_complete() {
            Some(self.cells.iter().flatten().collect())
        } else {
            None
        }
    }

    /// Cells rendered as strings, empty cells as `""`
    pub fn to_strings(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|c| c.map(String::from).unwrap_or_default())
            .collect()
    }

    fn set(&mut self, index: usize, digit: Option<char>) {
        debug_assert!(digit.map_or(true, |d| d.is_ascii_digit()));
        if let Some(cell) = self.cells.get_mut(index) {
            *cell = digit;
        }
    }

    fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
    }
}

/// Strip everything that is not an ASCII decimal digit
pub fn digits_only(raw: &str) -> Vec<char> {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// One code-entry field
pub struct DigitCodeInput {
    digits: DigitArray,
    focus: usize,
    completion_delay: Duration,
    listener: Arc<dyn DigitInputListener>,
    pending_completion: Option<JoinHandle<()>>,
}

impl DigitCodeInput {
    /// Create a field with `len` boxes
    pub fn new(len: usize, listener: Arc<dyn DigitInputListener>) -> Self {
        Self::with_delay(len, COMPLETION_DELAY, listener)
    }

    /// Create a field with a custom completion delay
    pub fn with_delay(
        len: usize,
        completion_delay: Duration,
        listener: Arc<dyn DigitInputListener>,
    ) -> Self {
        Self {
            digits: DigitArray::new(len),
            focus: 0,
            completion_delay,
            listener,
            pending_completion: None,
        }
    }

    /// Current contents
    pub fn digits(&self) -> &DigitArray {
        &self.digits
    }

    /// Index of the box holding the caret
    pub fn focus(&self) -> usize {
        self.focus
    }

    /// Move the caret without editing (e.g. the user clicked a box)
    pub fn set_focus(&mut self, index: usize) {
        if index < self.digits.len() {
            self.focus = index;
        }
    }

    /// Concatenated code, only when every box is filled
    pub fn code(&self) -> Option<String> {
        self.digits.code()
    }

    /// Whether a delayed completion is waiting to fire
    pub fn completion_pending(&self) -> bool {
        self.pending_completion
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// A character (or burst of characters) was typed into box `index`
    pub fn on_character(&mut self, index: usize, raw: &str) {
        if index >= self.digits.len() {
            return;
        }

        // Keep only the last digit so re-typing overwrites the box
        let Some(&digit) = digits_only(raw).last() else {
            return;
        };

        self.cancel_pending_completion();
        self.digits.set(index, Some(digit));

        let last = self.digits.len() - 1;
        if index < last {
            self.move_focus(index + 1);
        } else if let Some(code) = self.digits.code() {
            self.schedule_completion(code);
        }
    }

    /// Backspace pressed in box `index`
    pub fn on_backspace(&mut self, index: usize) {
        if index >= self.digits.len() {
            return;
        }

        self.cancel_pending_completion();

        if self.digits.get(index).is_none() && index > 0 {
            self.digits.set(index - 1, None);
            self.move_focus(index - 1);
        } else {
            self.digits.set(index, None);
        }
    }

    /// Text pasted anywhere in the field
    pub fn on_paste(&mut self, text: &str) {
        let pasted = digits_only(text);
        if pasted.is_empty() || self.digits.is_empty() {
            return;
        }

        self.cancel_pending_completion();

        for (index, digit) in pasted.iter().take(self.digits.len()).enumerate() {
            self.digits.set(index, Some(*digit));
        }

        self.move_focus(pasted.len().min(self.digits.len() - 1));

        // Only a paste that alone covers every box completes, with no render delay
        if pasted.len() < self.digits.len() {
            return;
        }
        if let Some(code) = self.digits.code() {
            debug!("Code field filled by paste");
            self.listener.on_complete(&code);
        }
    }

    /// Empty every box and return the caret to the start
    pub fn clear(&mut self) {
        self.cancel_pending_completion();
        self.digits.clear();
        self.move_focus(0);
    }

    fn move_focus(&mut self, index: usize) {
        self.focus = index;
        self.listener.on_focus_advance(index);
    }

    fn schedule_completion(&mut self, code: String) {
        let listener = Arc::clone(&self.listener);
        let delay = self.completion_delay;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.pending_completion = Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    listener.on_complete(&code);
                }));
            }
            Err(_) => {
                debug!("No runtime for delayed completion, completing inline");
                listener.on_complete(&code);
            }
        }
    }

    fn cancel_pending_completion(&mut self) {
        if let Some(handle) = self.pending_completion.take() {
            handle.abort();
        }
    }
}

impl Drop for DigitCodeInput {
    fn drop(&mut self) {
        self.cancel_pending_completion();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        focus: Mutex<Vec<usize>>,
        completed: Mutex<Vec<String>>,
    }

    impl DigitInputListener for Recorder {
        fn on_focus_advance(&self, index: usize) {
            self.focus.lock().unwrap().push(index);
        }

        fn on_complete(&self, code: &str) {
            self.completed.lock().unwrap().push(code.to_string());
        }
    }

    fn field(len: usize) -> (DigitCodeInput, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (DigitCodeInput::new(len, recorder.clone()), recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_code_completes_after_delay() {
        let (mut input, recorder) = field(6);

        for (i, c) in "482913".chars().enumerate() {
            input.on_character(i, &c.to_string());
        }

        assert_eq!(input.code().as_deref(), Some("482913"));
        assert_eq!(*recorder.focus.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(recorder.completed.lock().unwrap().is_empty());

        tokio::time::sleep(COMPLETION_DELAY - Duration::from_millis(1)).await;
        assert!(recorder.completed.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*recorder.completed.lock().unwrap(), vec!["482913".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retyping_overwrites_with_last_digit() {
        let (mut input, _) = field(6);
        input.on_character(0, "12");
        assert_eq!(input.digits().get(0), Some('2'));
        assert_eq!(input.focus(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_digits_are_dropped() {
        let (mut input, recorder) = field(6);
        input.on_character(0, "a");
        assert_eq!(input.digits().get(0), None);
        assert_eq!(input.focus(), 0);
        assert!(recorder.focus.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backspace_on_empty_clears_previous() {
        let (mut input, _) = field(6);
        input.on_character(0, "4");
        input.on_character(1, "8");
        assert_eq!(input.focus(), 2);

        input.on_backspace(2);
        assert_eq!(input.digits().get(1), None);
        assert_eq!(input.digits().get(0), Some('4'));
        assert_eq!(input.focus(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backspace_on_filled_clears_in_place() {
        let (mut input, _) = field(6);
        input.on_character(0, "4");
        input.on_character(1, "8");
        input.set_focus(1);

        input.on_backspace(1);
        assert_eq!(input.digits().get(1), None);
        assert_eq!(input.digits().get(0), Some('4'));
        assert_eq!(input.focus(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backspace_at_start_touches_nothing_else() {
        let (mut input, _) = field(4);
        input.on_paste("0123");
        input.on_backspace(0);
        input.on_backspace(0);
        assert_eq!(input.digits().to_strings(), vec!["", "1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_completes_immediately() {
        let (mut input, recorder) = field(6);
        input.on_paste("48-29 13");
        assert_eq!(*recorder.completed.lock().unwrap(), vec!["482913".to_string()]);
        assert_eq!(input.focus(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_paste_leaves_tail_untouched() {
        let (mut input, recorder) = field(6);
        input.on_character(5, "9");
        input.on_paste("12");
        assert_eq!(input.digits().to_strings(), vec!["1", "2", "", "", "", "9"]);
        assert_eq!(input.focus(), 2);
        assert!(recorder.completed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_paste_over_filled_tail_does_not_complete() {
        let (mut input, recorder) = field(6);
        input.on_character(5, "9");
        input.on_paste("12345");

        assert_eq!(input.code().as_deref(), Some("123459"));
        tokio::time::sleep(COMPLETION_DELAY * 2).await;
        assert!(recorder.completed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_cancels_pending_completion() {
        let (mut input, recorder) = field(2);
        input.on_character(0, "1");
        input.on_character(1, "2");
        assert!(input.completion_pending());

        input.on_backspace(1);
        tokio::time::sleep(COMPLETION_DELAY * 2).await;
        assert!(recorder.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_completes_inline_without_runtime() {
        let (mut input, recorder) = field(1);
        input.on_character(0, "7");
        assert_eq!(*recorder.completed.lock().unwrap(), vec!["7".to_string()]);
    }
}
