mod cantilever;
mod membrane_patch;
