mod breakpoints;
mod inspection;
mod stepping;
mod target;
