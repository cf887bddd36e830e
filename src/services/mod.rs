pub mod due;
pub mod feedback;
pub mod records;
pub mod tasks;
pub mod words;
