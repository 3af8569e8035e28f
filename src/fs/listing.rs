use std::vec;

/// Directory entries captured when the directory was opened.
///
/// Later changes to the index are not reflected, and once consumed the
/// listing cannot be rewound; open the directory again instead.
#[derive(Debug)]
pub struct DirListing {
    entries: vec::IntoIter<String>,
}

impl DirListing {
    pub(crate) fn new(mut names: Vec<String>) -> Self {
        names.sort();
        Self {
            entries: names.into_iter(),
        }
    }
}

impl Iterator for DirListing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for DirListing {}
