mod delegation;
mod flags;
