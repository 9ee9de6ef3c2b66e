//! Mail delivery contract.
//!
//! Mailer methods compose a message and return it undelivered; the mailer
//! flavor of the executor then delivers it. Composition and transport belong
//! to the mail subsystem, which only has to implement [`Deliverable`].

/// A composed message that has not been sent yet.
pub trait Deliverable: Send {
    /// Send the message now, consuming it.
    fn deliver_now(self: Box<Self>) -> anyhow::Result<()>;

    /// Short description for logs (e.g. recipient and subject).
    fn summary(&self) -> String {
        String::from("mail message")
    }
}

impl core::fmt::Debug for dyn Deliverable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Deliverable").field(&self.summary()).finish()
    }
}
