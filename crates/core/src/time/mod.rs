pub mod iso;
