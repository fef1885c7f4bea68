use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

/// Petit writer qui **capture** le stdout dans une String (utile en tests).
#[derive(Debug, Default, Clone)]
pub struct Captured(Rc<RefCell<String>>);

impl Captured {
    /// Récupère le buffer (copie).
    pub fn get(&self) -> String { self.0.borrow().clone() }
    /// Réinitialise le buffer.
    pub fn clear(&self) { self.0.borrow_mut().clear(); }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_buffer() {
        let cap = Captured::default();
        let mut w = cap.clone();
        write!(w, "a{}", 1).unwrap();
        assert_eq!(cap.get(), "a1");
        cap.clear();
        assert!(cap.get().is_empty());
    }
}
