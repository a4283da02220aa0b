mod print;
mod symbolize;
mod trace;
