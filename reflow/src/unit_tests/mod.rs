mod retry_test;

#[derive(Clone, Debug, PartialEq)]
pub struct Article {
    pub id: u32,
    pub title: String,
}

impl Article {
    pub fn new(id: u32, title: &str) -> Self {
        Article {
            id,
            title: title.to_string(),
        }
    }
}
