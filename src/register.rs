//! Shadow images of write-only hardware registers
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.

/// An in-memory mirror of a write-only hardware register.
///
/// # Note
/// The shadow may only be modified through a [Transaction]. A transaction that is dropped
/// without being committed restores the previous value, so the shadow never claims a state
/// that was not successfully transmitted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shadow<T: Copy> {
    value: T,
}

impl<T: Copy> Shadow<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Get the last committed register value.
    pub fn get(&self) -> T {
        self.value
    }

    /// Begin modifying the register.
    pub fn begin(&mut self) -> Transaction<'_, T> {
        Transaction {
            saved: self.value,
            shadow: self,
            committed: false,
        }
    }

    /// Modify the register and transmit the result.
    ///
    /// # Args
    /// * `modify` - Updates the register image.
    /// * `transmit` - Writes the updated image to the hardware.
    ///
    /// # Returns
    /// The result of the transmission. The shadow is rolled back if it failed.
    pub fn update<E>(
        &mut self,
        modify: impl FnOnce(&mut T),
        transmit: impl FnOnce(T) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut transaction = self.begin();
        modify(transaction.value_mut());
        transmit(transaction.value())?;
        transaction.commit();
        Ok(())
    }
}

/// A pending modification of a [Shadow] register.
pub struct Transaction<'a, T: Copy> {
    shadow: &'a mut Shadow<T>,
    saved: T,
    committed: bool,
}

impl<T: Copy> Transaction<'_, T> {
    /// The attempted register value.
    pub fn value(&self) -> T {
        self.shadow.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.shadow.value
    }

    /// Keep the attempted value.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<T: Copy> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.shadow.value = self.saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bit_field::BitField;

    #[test]
    fn failed_transmission_rolls_back() {
        let mut register = Shadow::new(0x0042u16);

        let result = register.update(|value| {
            value.set_bits(0..12, 0xABC);
        }, |_| Err(()));

        assert!(result.is_err());
        assert_eq!(register.get(), 0x0042);
    }

    #[test]
    fn committed_transaction_is_kept() {
        let mut register = Shadow::new(0u16);

        let mut transaction = register.begin();
        transaction.value_mut().set_bit(3, true);
        assert_eq!(transaction.value(), 0x8);
        transaction.commit();

        assert_eq!(register.get(), 0x8);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut register = Shadow::new(7u8);
        {
            let mut transaction = register.begin();
            *transaction.value_mut() = 0;
        }
        assert_eq!(register.get(), 7);
    }
}
