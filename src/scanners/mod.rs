pub mod mangafox;
