/// Per-page information handed to `on_page` callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocContext {
    pub page_number: usize,
    /// Known only once a previous pass has counted the pages.
    pub page_count: Option<usize>,
    pub template_name: String,
}

impl DocContext {
    pub fn new(page_number: usize, page_count: Option<usize>, template_name: impl Into<String>) -> Self {
        Self {
            page_number,
            page_count,
            template_name: template_name.into(),
        }
    }

    pub fn is_first_page(&self) -> bool {
        self.page_number == 1
    }
}
