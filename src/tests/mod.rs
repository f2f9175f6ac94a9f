mod index;
mod legacy;
