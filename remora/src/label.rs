use std::borrow::Cow;

pub trait Label {
    /// Returns a human-readable label for this item.
    /// Used in log fields and statistics keys.
    fn label(&self) -> Cow<'static, str>;
}
