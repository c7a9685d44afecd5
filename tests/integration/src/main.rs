mod helpers;

mod promotion;
mod supervision;
