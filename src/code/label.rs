use std::fmt;

/// Opaque position in a code element stream
///
/// Labels are handed out by a [`LabelGenerator`] (usually the
/// [`CodeBuilder`](crate::code::CodeBuilder)) before the offset they stand for is known, and bound
/// by emitting a [`CodeElement::Label`](crate::code::CodeElement::Label).
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(pub(crate) u32);

impl Label {
    /// First label of a fresh label space
    pub const START: Label = Label(0);

    /// Get the next fresh label
    pub fn next(&self) -> Label {
        Label(self.0 + 1)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Generates new labels
pub trait LabelGenerator<Label> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Label;
}

/// Label generator that counts upwards
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct LabelSequence(Label);

impl LabelSequence {
    pub fn new(start: Label) -> LabelSequence {
        LabelSequence(start)
    }

    /// Number of labels handed out, if the sequence started at [`Label::START`]
    pub fn count(&self) -> u32 {
        self.0 .0
    }
}

impl LabelGenerator<Label> for LabelSequence {
    fn fresh_label(&mut self) -> Label {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "L{}", self.0)
    }
}
